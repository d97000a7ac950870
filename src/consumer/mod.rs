//! Generic consumer: one receive loop over a broker or in-process binding.
//!
//! Lifecycle is `new` → `start` → receiving until cancelled, closed, or a transport error.
//! Every delivery is handled and then acknowledged, whether or not handling produced an
//! output. Chunked envelopes are buffered in the consumer's [`ChunkAssembler`] and only the
//! completed logical message is forwarded. The output queue is bounded; a slow reader stalls
//! the loop.

mod binding;
mod channel;
mod offset;

pub use binding::{BrokerBindingFactory, Delivery, Receipt, ReceiveBinding, StartPosition};
pub use channel::{ChannelBinding, ChannelPublisher, ChannelRegistry};
pub use offset::{initial_positions, InMemoryOffsetStore, OffsetRecord, OffsetStore};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::assembler::{ChunkAssembler, PendingGroup};
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::TransportSettings;
use crate::credential::ConnectionCredential;
use crate::envelope::Envelope;
use crate::error::ConsumerError;
use crate::protocol::TransportProtocol;

/// Identity reported by consumers on the in-process channel transport.
pub const CHANNEL_CLUSTER_IDENTITY: &str = "kafka-cluster-chan";
/// Topic used by the in-process transport when none is given.
pub const DEFAULT_CHANNEL_TOPIC: &str = "event";

/// What a consumer connects to.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Protocol name; parsed with [`TransportProtocol::from_str`](std::str::FromStr).
    pub transport_type: String,
    pub credential: Option<ConnectionCredential>,
    pub cluster_identity: String,
    pub channels: ChannelRegistry,
    pub broker: Option<Arc<dyn BrokerBindingFactory>>,
}

impl TransportConfig {
    /// In-process transport over `channels`.
    pub fn in_process(channels: ChannelRegistry) -> Self {
        Self {
            transport_type: TransportProtocol::InProcess.to_string(),
            credential: None,
            cluster_identity: CHANNEL_CLUSTER_IDENTITY.to_string(),
            channels,
            broker: None,
        }
    }

    /// Broker transport using `factory` to build the client from `credential`.
    pub fn broker(
        protocol: TransportProtocol,
        credential: ConnectionCredential,
        cluster_identity: impl Into<String>,
        factory: Arc<dyn BrokerBindingFactory>,
    ) -> Self {
        Self {
            transport_type: protocol.to_string(),
            credential: Some(credential),
            cluster_identity: cluster_identity.into(),
            channels: ChannelRegistry::default(),
            broker: Some(factory),
        }
    }
}

/// Optional consumer behavior.
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// Recover start positions from this store at `start`.
    pub offset_store: Option<Arc<dyn OffsetStore>>,
    /// Output queue capacity; values below one are raised to one.
    pub output_capacity: usize,
    /// Evict incomplete chunk groups older than this.
    pub assembly_ttl: Option<Duration>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self { offset_store: None, output_capacity: 1, assembly_ttl: None, clock: None }
    }
}

impl ConsumerOptions {
    /// Options from settings. The offset store is used only when recovery is enabled.
    pub fn from_settings(
        settings: &TransportSettings,
        offset_store: Option<Arc<dyn OffsetStore>>,
    ) -> Self {
        Self {
            offset_store: offset_store.filter(|_| settings.enable_offset_recovery),
            output_capacity: settings.output_capacity,
            assembly_ttl: settings.assembly_ttl,
            clock: None,
        }
    }

    pub fn with_offset_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.offset_store = Some(store);
        self
    }

    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn with_assembly_ttl(mut self, ttl: Duration) -> Self {
        self.assembly_ttl = Some(ttl);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Receives envelopes from one binding and forwards completed messages to a bounded queue.
pub struct GenericConsumer {
    protocol: TransportProtocol,
    cluster_identity: String,
    binding: Mutex<Option<Box<dyn ReceiveBinding>>>,
    assembler: ChunkAssembler,
    offset_store: Option<Arc<dyn OffsetStore>>,
    assembly_ttl: Option<Duration>,
    output: mpsc::Sender<Envelope>,
    events: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

impl std::fmt::Debug for GenericConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericConsumer")
            .field("protocol", &self.protocol)
            .field("cluster_identity", &self.cluster_identity)
            .field("pending_groups", &self.assembler.pending_len())
            .finish_non_exhaustive()
    }
}

impl GenericConsumer {
    /// Select and build the receive binding for `config`.
    ///
    /// The in-process transport reads the first of `topics` (or [`DEFAULT_CHANNEL_TOPIC`]);
    /// broker transports subscribe to all of them.
    pub fn new(
        config: &TransportConfig,
        topics: &[String],
        options: ConsumerOptions,
    ) -> Result<Self, ConsumerError> {
        let protocol: TransportProtocol = config.transport_type.parse()?;
        let binding: Box<dyn ReceiveBinding> = match protocol {
            TransportProtocol::InProcess => {
                let topic = topics.first().map(String::as_str).unwrap_or(DEFAULT_CHANNEL_TOPIC);
                Box::new(config.channels.binding(topic))
            }
            TransportProtocol::BringYourOwn | TransportProtocol::Managed => {
                let factory = config
                    .broker
                    .as_ref()
                    .ok_or_else(|| ConsumerError::MissingBrokerBinding(protocol.to_string()))?;
                let credential = config
                    .credential
                    .as_ref()
                    .ok_or_else(|| ConsumerError::MissingCredential(protocol.to_string()))?;
                factory.bind(credential, topics, &config.cluster_identity)?
            }
        };
        let cluster_identity = if protocol.is_broker() {
            config.cluster_identity.clone()
        } else {
            CHANNEL_CLUSTER_IDENTITY.to_string()
        };

        let assembler = match options.clock {
            Some(clock) => ChunkAssembler::with_clock(clock),
            None => ChunkAssembler::new(),
        };
        let (output, events) = mpsc::channel(options.output_capacity.max(1));
        debug!(
            target: "hub_transport::consumer",
            %protocol,
            binding = binding.name(),
            cluster = %cluster_identity,
            "consumer constructed"
        );

        Ok(Self {
            protocol,
            cluster_identity,
            binding: Mutex::new(Some(binding)),
            assembler,
            offset_store: options.offset_store,
            assembly_ttl: options.assembly_ttl,
            output,
            events: Mutex::new(Some(events)),
        })
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Identity this consumer reads on behalf of.
    pub fn cluster_identity(&self) -> &str {
        &self.cluster_identity
    }

    /// Take the output queue of completed messages. Only the first call returns it.
    pub fn event_chan(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Incomplete chunk groups currently buffered.
    pub fn pending_chunk_groups(&self) -> Vec<PendingGroup> {
        self.assembler.pending_groups()
    }

    /// Run the receive loop until `cancel` fires, the transport closes, or it fails.
    ///
    /// Returns `Ok(())` on cancellation or clean close. Can be called once.
    pub async fn start(&self, cancel: &CancelToken) -> Result<(), ConsumerError> {
        if self.binding.lock().unwrap_or_else(|e| e.into_inner()).is_none() {
            return Err(ConsumerError::AlreadyStarted);
        }

        let positions = match &self.offset_store {
            Some(store) => initial_positions(store.as_ref(), &self.cluster_identity).await?,
            None => Vec::new(),
        };

        let mut binding = self
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(ConsumerError::AlreadyStarted)?;

        if !positions.is_empty() {
            info!(
                target: "hub_transport::consumer",
                cluster = %self.cluster_identity,
                positions = ?positions,
                "init consumer"
            );
        }
        if let Err(e) = binding.open(&positions).await {
            binding.close().await;
            return Err(e);
        }

        let result = self.receive(binding.as_mut(), cancel).await;
        binding.close().await;
        match &result {
            Ok(()) => info!(target: "hub_transport::consumer", binding = binding.name(), "receiver stopped"),
            Err(e) => warn!(target: "hub_transport::consumer", binding = binding.name(), error = %e, "receiver stopped"),
        }
        result
    }

    async fn receive(
        &self,
        binding: &mut dyn ReceiveBinding,
        cancel: &CancelToken,
    ) -> Result<(), ConsumerError> {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = binding.recv() => match next? {
                    Some(delivery) => delivery,
                    None => return Ok(()),
                },
            };
            let Delivery { envelope, receipt } = delivery;
            trace!(
                target: "hub_transport::consumer",
                topic = %receipt.topic,
                partition = receipt.partition,
                offset = receipt.offset,
                "received message"
            );

            if let Some(message) = self.handle(envelope, &receipt) {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = self.output.send(message) => {
                        if sent.is_err() {
                            debug!(target: "hub_transport::consumer", "event channel closed; dropping message");
                        }
                    }
                }
            }

            if let Err(e) = binding.ack(&receipt).await {
                warn!(
                    target: "hub_transport::consumer",
                    topic = %receipt.topic,
                    offset = receipt.offset,
                    error = %e,
                    "failed to acknowledge message"
                );
            }
        }
    }

    fn handle(
        &self,
        envelope: Result<Envelope, crate::envelope::EnvelopeError>,
        receipt: &Receipt,
    ) -> Option<Envelope> {
        let mut envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(target: "hub_transport::consumer", topic = %receipt.topic, offset = receipt.offset, error = %e, "dropping undecodable message");
                return None;
            }
        };
        let Some(chunk) = envelope.chunk.take() else {
            return Some(envelope);
        };

        if let Some(ttl) = self.assembly_ttl {
            let evicted = self.assembler.evict_if_due(ttl);
            if evicted > 0 {
                debug!(target: "hub_transport::assembler", evicted, "evicted stale chunk groups");
            }
        }

        match self.assembler.on_chunk(&chunk.group_key, chunk.index, chunk.total, envelope.payload) {
            Ok(Some(payload)) => {
                envelope.payload = payload;
                envelope.id = chunk.group_key;
                Some(envelope)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(target: "hub_transport::assembler", error = %e, "dropping inconsistent chunk");
                None
            }
        }
    }
}
