//! Convenient re-exports for embedding the hub transport.
pub use crate::{
    cancel::{cancel_pair, CancelToken},
    config::TransportSettings,
    consumer::{
        BrokerBindingFactory, ConsumerOptions, Delivery, GenericConsumer, Receipt, ReceiveBinding,
        StartPosition, TransportConfig,
    },
    envelope::Envelope,
    orchestrator::{MiddlewareConfig, Orchestrator, Requeue},
    protocol::TransportProtocol,
    ConnectionCredential, ConsumerError, MiddlewareError, ProvisionError,
};
