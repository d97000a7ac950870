use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::debug;

use crate::control_plane::{BrokerControlPlane, ManagedResource, Subscription};
use crate::credential::ConnectionCredential;
use crate::error::ProvisionError;
use crate::protocol::TransportProtocol;
use crate::topic::{AccessMode, ClusterTopicSet, Grant};

const COMMUNITY_PACKAGE: &str = "strimzi-kafka-operator";
const COMMUNITY_CHANNEL: &str = "strimzi-0.36.x";
const COMMUNITY_CATALOG: &str = "community-operators";
const PRODUCT_PACKAGE: &str = "amq-streams";
const PRODUCT_CHANNEL: &str = "amq-streams-2.5.x";
const PRODUCT_CATALOG: &str = "redhat-operators";

/// Control-plane subscription for the selected operator flavour.
pub fn subscription_for(community: bool, namespace: &str) -> Subscription {
    let (package, channel, catalog) = if community {
        (COMMUNITY_PACKAGE, COMMUNITY_CHANNEL, COMMUNITY_CATALOG)
    } else {
        (PRODUCT_PACKAGE, PRODUCT_CHANNEL, PRODUCT_CATALOG)
    };
    Subscription {
        package: package.to_string(),
        channel: channel.to_string(),
        catalog_source: catalog.to_string(),
        namespace: namespace.to_string(),
    }
}

/// Broker monitoring side-resources for `namespace`.
pub fn render_metrics_resources(namespace: &str) -> Vec<ManagedResource> {
    [("PodMonitor", "kafka-resources-metrics"), ("ConfigMap", "kafka-metrics")]
        .into_iter()
        .map(|(kind, name)| ManagedResource {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
        .collect()
}

/// Transporter that provisions through a broker control plane the hub installs itself.
#[derive(Debug)]
pub struct ManagedTransporter {
    control_plane: Arc<dyn BrokerControlPlane>,
    namespace: String,
    community: bool,
    enable_metrics: bool,
    metrics: OnceLock<Vec<ManagedResource>>,
}

impl ManagedTransporter {
    pub fn new(control_plane: Arc<dyn BrokerControlPlane>, namespace: impl Into<String>) -> Self {
        Self {
            control_plane,
            namespace: namespace.into(),
            community: false,
            enable_metrics: false,
            metrics: OnceLock::new(),
        }
    }

    /// Install the community operator instead of the product one.
    pub fn with_community(mut self, community: bool) -> Self {
        self.community = community;
        self
    }

    /// Apply broker metric side-resources as part of the prerequisites.
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    async fn grant(&self, principal: &str, topic: &str, mode: AccessMode) -> Result<(), ProvisionError> {
        debug!(target: "hub_transport::provision", principal, topic, %mode, "granting topic access");
        self.control_plane.grant(&Grant::new(principal, topic, mode)).await
    }
}

#[async_trait]
impl super::Transporter for ManagedTransporter {
    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Managed
    }

    async fn ensure_prerequisites(&self) -> Result<(), ProvisionError> {
        if self.enable_metrics {
            let resources = self.metrics.get_or_init(|| render_metrics_resources(&self.namespace));
            self.control_plane.apply_resources(resources).await?;
        }
        self.control_plane.ensure_subscription(&subscription_for(self.community, &self.namespace)).await
    }

    async fn create_user(&self, principal: &str) -> Result<(), ProvisionError> {
        self.control_plane.create_principal(principal).await
    }

    async fn create_topic(&self, topics: &ClusterTopicSet) -> Result<(), ProvisionError> {
        for topic in topics.all() {
            self.control_plane.create_topic(topic).await?;
        }
        Ok(())
    }

    async fn grant_read(&self, principal: &str, topic: &str) -> Result<(), ProvisionError> {
        self.grant(principal, topic, AccessMode::Read).await
    }

    async fn grant_write(&self, principal: &str, topic: &str) -> Result<(), ProvisionError> {
        self.grant(principal, topic, AccessMode::Write).await
    }

    async fn get_conn_credential(&self, principal: &str) -> Result<ConnectionCredential, ProvisionError> {
        self.control_plane.read_credential(principal).await
    }
}
