use std::sync::Arc;

use async_trait::async_trait;

use crate::credential::ConnectionCredential;
use crate::error::ProvisionError;
use crate::protocol::TransportProtocol;
use crate::secret::SecretStore;
use crate::topic::ClusterTopicSet;

/// Transporter for an externally supplied broker.
///
/// The hub does not own that broker's configuration: users, topics, and grants are assumed to
/// exist already, and the credential comes from the transport secret.
#[derive(Debug, Clone)]
pub struct ByoTransporter {
    store: Arc<dyn SecretStore>,
    secret_name: String,
    namespace: String,
}

impl ByoTransporter {
    pub fn new(
        store: Arc<dyn SecretStore>,
        secret_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self { store, secret_name: secret_name.into(), namespace: namespace.into() }
    }
}

#[async_trait]
impl super::Transporter for ByoTransporter {
    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::BringYourOwn
    }

    async fn create_user(&self, _principal: &str) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn create_topic(&self, _topics: &ClusterTopicSet) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn grant_read(&self, _principal: &str, _topic: &str) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn grant_write(&self, _principal: &str, _topic: &str) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn get_conn_credential(&self, _principal: &str) -> Result<ConnectionCredential, ProvisionError> {
        let secret = self.store.get(&self.secret_name, &self.namespace).await?;
        ConnectionCredential::from_secret(&secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{KEY_BOOTSTRAP_SERVER, KEY_CA_CERT};
    use crate::secret::{InMemorySecretStore, Secret};
    use crate::transporter::Transporter;

    #[tokio::test]
    async fn reads_credential_from_secret() {
        let store = InMemorySecretStore::new();
        store.insert(
            Secret::new("transport", "hub")
                .with(KEY_BOOTSTRAP_SERVER, "byo-kafka:9093")
                .with(KEY_CA_CERT, "CA"),
        );
        let byo = ByoTransporter::new(Arc::new(store), "transport", "hub");

        let topics = byo.generate_cluster_topic("global");
        byo.create_user("u").await.unwrap();
        byo.create_topic(&topics).await.unwrap();
        byo.grant_write("u", &topics.spec_topic).await.unwrap();

        let cred = byo.get_conn_credential("u").await.unwrap();
        assert_eq!(cred.bootstrap_server, "byo-kafka:9093");
        assert_eq!(cred.ca_cert.as_deref(), Some("CA"));
    }

    #[tokio::test]
    async fn missing_secret_surfaces_as_secret_error() {
        let byo = ByoTransporter::new(Arc::new(InMemorySecretStore::new()), "transport", "hub");
        let err = byo.get_conn_credential("u").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Secret(ref e) if e.is_not_found()));
    }
}
