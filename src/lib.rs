#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # hub-transport
//!
//! Transport provisioning and chunk-aware consumption for a multi-cluster management hub.
//!
//! ## Features
//!
//! - **Protocol detection**: bring-your-own broker when the transport secret exists, managed
//!   otherwise
//! - **Transport provisioners** that create principals, topics, and grants idempotently
//! - **Credential waiter** with a fixed poll interval, an overall deadline, and cancellation
//! - **Middleware orchestrator** running transport and storage provisioning as a joint pass
//! - **Generic consumer** over a broker or in-process channel, with bounded output
//! - **Chunk assembler** that reorders and joins split messages, one completion per group
//!
//! Broker clients live in companion crates (`hub-transport-kafka`) and plug in through
//! [`BrokerBindingFactory`].
//!
//! ## Quick Start
//!
//! ```rust
//! use hub_transport::{
//!     cancel_pair, ChannelRegistry, ConsumerOptions, Envelope, GenericConsumer, TransportConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channels = ChannelRegistry::new();
//!     let consumer = Arc::new(GenericConsumer::new(
//!         &TransportConfig::in_process(channels.clone()),
//!         &["event".to_string()],
//!         ConsumerOptions::default(),
//!     )?);
//!     let mut events = consumer.event_chan().expect("first call returns the queue");
//!
//!     let (canceller, token) = cancel_pair();
//!     let running = tokio::spawn({
//!         let consumer = consumer.clone();
//!         async move { consumer.start(&token).await }
//!     });
//!
//!     let publisher = channels.publisher("event");
//!     for chunk in Envelope::split("hub1", "status", b"a large status bundle", 8) {
//!         publisher.publish(chunk).await?;
//!     }
//!     let bundle = events.recv().await.expect("assembled bundle");
//!     assert_eq!(bundle.payload, b"a large status bundle");
//!
//!     canceller.cancel();
//!     running.await??;
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod control_plane;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod prelude;
pub mod protocol;
pub mod secret;
pub mod storage;
pub mod topic;
pub mod transporter;
pub mod waiter;

// Re-exports
pub use assembler::{ChunkAssembler, PendingGroup};
pub use cancel::{cancel_pair, CancelToken, Canceller};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, TransportSettings};
pub use consumer::{
    BrokerBindingFactory, ChannelPublisher, ChannelRegistry, ConsumerOptions, GenericConsumer,
    InMemoryOffsetStore, OffsetRecord, OffsetStore, ReceiveBinding, StartPosition,
    TransportConfig,
};
pub use control_plane::{BrokerControlPlane, InMemoryControlPlane};
pub use credential::{ConnectionCredential, PrincipalCredential};
pub use envelope::{ChunkMeta, Envelope, EnvelopeError};
pub use error::{
    AssemblyError, ConsumerError, DetectionError, MiddlewareError, ProvisionError, SecretError,
};
pub use orchestrator::{ControlPlaneWatcher, MiddlewareConfig, Orchestrator, Requeue};
pub use protocol::{detect, TransportProtocol};
pub use secret::{InMemorySecretStore, Secret, SecretStore};
pub use storage::{SecretStorageProvisioner, StorageConnection, StorageProvisioner};
pub use topic::{AccessMode, ClusterTopicSet, Grant};
pub use transporter::{provision, ByoTransporter, ManagedTransporter, Transporter};
pub use waiter::{poll_until_ready, wait_for_credential};
