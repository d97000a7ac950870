//! Receive bindings: the seam between the generic consumer and a concrete transport.

use async_trait::async_trait;

use crate::credential::ConnectionCredential;
use crate::envelope::{Envelope, EnvelopeError};
use crate::error::ConsumerError;

/// Where to resume reading one topic partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StartPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Coordinates of a received message, used to acknowledge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One message handed up by a binding.
#[derive(Debug)]
pub struct Delivery {
    /// The decoded envelope, or why the raw message could not be decoded.
    pub envelope: Result<Envelope, EnvelopeError>,
    pub receipt: Receipt,
}

/// A concrete receive transport.
///
/// `recv` must be cancel-safe: the receive loop races it against the cancellation signal.
#[async_trait]
pub trait ReceiveBinding: Send {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Prepare to receive. A non-empty `start` pins those partitions to the given offsets;
    /// an empty one starts from the transport's default position.
    async fn open(&mut self, start: &[StartPosition]) -> Result<(), ConsumerError>;

    /// Next delivery. `Ok(None)` means the transport closed cleanly; `Err` is fatal.
    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError>;

    /// Acknowledge a handled delivery.
    async fn ack(&mut self, receipt: &Receipt) -> Result<(), ConsumerError>;

    /// Release transport resources. Called once when the loop exits.
    async fn close(&mut self) {}
}

/// Builds broker bindings from a provisioned credential.
///
/// Broker clients live in companion crates; they implement this trait so the core never links
/// a broker client library.
pub trait BrokerBindingFactory: Send + Sync + std::fmt::Debug {
    fn bind(
        &self,
        credential: &ConnectionCredential,
        topics: &[String],
        cluster_identity: &str,
    ) -> Result<Box<dyn ReceiveBinding>, ConsumerError>;
}
