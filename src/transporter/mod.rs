//! Transport provisioners.
//!
//! A [`Transporter`] creates broker-side principals, topics, and permissions and hands back a
//! [`ConnectionCredential`]. Two implementations exist:
//! - [`ByoTransporter`]: the broker belongs to someone else; the credential is read from a
//!   secret and every mutating call is an already-satisfied no-op.
//! - [`ManagedTransporter`]: the hub installs and drives a broker control plane.
//!
//! [`provision`] runs the full sequence. Each step is idempotent, so a failed run can be
//! retried from the top; steps already completed are left in place.

mod byo;
mod managed;

pub use byo::ByoTransporter;
pub use managed::{render_metrics_resources, subscription_for, ManagedTransporter};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::TransportSettings;
use crate::credential::ConnectionCredential;
use crate::error::ProvisionError;
use crate::protocol::TransportProtocol;
use crate::topic::ClusterTopicSet;
use crate::waiter::wait_for_credential;

/// Provisioning capability shared by every transport variant.
#[async_trait]
pub trait Transporter: Send + Sync + std::fmt::Debug {
    fn protocol(&self) -> TransportProtocol;

    /// Install whatever must exist before principals and topics can be created.
    async fn ensure_prerequisites(&self) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn create_user(&self, principal: &str) -> Result<(), ProvisionError>;

    /// Topic names for `cluster_identity`. Pure; no I/O.
    fn generate_cluster_topic(&self, cluster_identity: &str) -> ClusterTopicSet {
        ClusterTopicSet::for_cluster(cluster_identity)
    }

    /// Create all topics of the set. Existing topics are not an error.
    async fn create_topic(&self, topics: &ClusterTopicSet) -> Result<(), ProvisionError>;

    async fn grant_read(&self, principal: &str, topic: &str) -> Result<(), ProvisionError>;

    async fn grant_write(&self, principal: &str, topic: &str) -> Result<(), ProvisionError>;

    /// Current credential for `principal`, or [`ProvisionError::NotReady`].
    async fn get_conn_credential(&self, principal: &str) -> Result<ConnectionCredential, ProvisionError>;
}

/// Run the provisioning sequence and wait for a usable credential.
///
/// Managed path: prerequisites, principal, topics for the hub identity, grants (read on event
/// and status, write on spec), then credential polling. Bring-your-own goes straight to the
/// credential read.
pub async fn provision(
    transporter: &dyn Transporter,
    settings: &TransportSettings,
    cancel: &CancelToken,
) -> Result<ConnectionCredential, ProvisionError> {
    provision_resources(transporter, settings).await?;
    let principal = settings.principal.as_str();

    let credential = wait_for_credential(
        move || transporter.get_conn_credential(principal),
        settings.poll_interval,
        settings.credential_timeout,
        cancel,
    )
    .await?;

    info!(
        target: "hub_transport::provision",
        protocol = %transporter.protocol(),
        principal,
        bootstrap = %credential.bootstrap_server,
        "transport credential ready"
    );
    Ok(credential)
}

/// Create the principal, topics, and grants without waiting for the credential.
///
/// A no-op for transports whose broker the hub does not own.
pub async fn provision_resources(
    transporter: &dyn Transporter,
    settings: &TransportSettings,
) -> Result<(), ProvisionError> {
    if transporter.protocol() != TransportProtocol::Managed {
        return Ok(());
    }
    let principal = settings.principal.as_str();
    transporter.ensure_prerequisites().await?;
    transporter.create_user(principal).await?;

    let topics = transporter.generate_cluster_topic(&settings.hub_identity);
    transporter.create_topic(&topics).await?;

    transporter.grant_read(principal, &topics.event_topic).await?;
    transporter.grant_read(principal, &topics.status_topic).await?;
    transporter.grant_write(principal, &topics.spec_topic).await?;
    debug!(
        target: "hub_transport::provision",
        principal,
        cluster = %settings.hub_identity,
        "transport resources provisioned"
    );
    Ok(())
}
