//! In-process channel transport.
//!
//! Components in the same process exchange envelopes through a shared queue per topic, created
//! lazily on first use. Every binding and publisher for a topic shares that one queue; bindings
//! on the same topic compete for messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::binding::{Delivery, Receipt, ReceiveBinding, StartPosition};
use crate::envelope::Envelope;
use crate::error::ConsumerError;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct ChannelPair {
    tx: mpsc::Sender<Envelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>,
}

/// Topic-keyed registry of in-memory channel pairs.
#[derive(Clone, Debug)]
pub struct ChannelRegistry {
    pairs: Arc<Mutex<HashMap<String, ChannelPair>>>,
    capacity: usize,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose channels buffer up to `capacity` envelopes (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self { pairs: Arc::default(), capacity: capacity.max(1) }
    }

    /// Publisher for `topic`, creating the channel if needed.
    pub fn publisher(&self, topic: &str) -> ChannelPublisher {
        ChannelPublisher { topic: topic.to_string(), tx: self.pair(topic).tx }
    }

    /// Receive binding for `topic`, creating the channel if needed.
    pub fn binding(&self, topic: &str) -> ChannelBinding {
        ChannelBinding { topic: topic.to_string(), rx: self.pair(topic).rx, next_offset: 0 }
    }

    /// Topics with a channel, sorted.
    pub fn topics(&self) -> Vec<String> {
        let pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        let mut topics: Vec<String> = pairs.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn pair(&self, topic: &str) -> ChannelPair {
        let mut pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        pairs
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(target: "hub_transport::consumer", topic, "creating in-process channel");
                let (tx, rx) = mpsc::channel(self.capacity);
                ChannelPair { tx, rx: Arc::new(tokio::sync::Mutex::new(rx)) }
            })
            .clone()
    }
}

/// Sends envelopes into an in-process topic.
#[derive(Clone, Debug)]
pub struct ChannelPublisher {
    topic: String,
    tx: mpsc::Sender<Envelope>,
}

impl ChannelPublisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send one envelope, waiting while the channel is full.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), ConsumerError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| ConsumerError::Transport(format!("channel {} closed", self.topic)))
    }
}

/// Receive side of an in-process topic.
#[derive(Debug)]
pub struct ChannelBinding {
    topic: String,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>,
    next_offset: i64,
}

#[async_trait]
impl ReceiveBinding for ChannelBinding {
    fn name(&self) -> &'static str {
        "chan"
    }

    async fn open(&mut self, start: &[StartPosition]) -> Result<(), ConsumerError> {
        if !start.is_empty() {
            debug!(
                target: "hub_transport::consumer",
                topic = %self.topic,
                positions = start.len(),
                "in-process channel has no history; ignoring start positions"
            );
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        let mut rx = self.rx.lock().await;
        let Some(envelope) = rx.recv().await else {
            return Ok(None);
        };
        let offset = self.next_offset;
        self.next_offset += 1;
        Ok(Some(Delivery {
            envelope: Ok(envelope),
            receipt: Receipt { topic: self.topic.clone(), partition: 0, offset },
        }))
    }

    async fn ack(&mut self, _receipt: &Receipt) -> Result<(), ConsumerError> {
        Ok(())
    }
}
