//! Kafka receive binding for `hub-transport` (companion crate).
//! Builds a `StreamConsumer` from a provisioned [`ConnectionCredential`]; envelopes travel as
//! `ce_*` headers plus the raw payload.

use async_trait::async_trait;
use hub_transport::consumer::{
    BrokerBindingFactory, Delivery, Receipt, ReceiveBinding, StartPosition,
};
use hub_transport::{ConnectionCredential, ConsumerError, Envelope, PrincipalCredential};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};

/// SASL mechanism used for username/password principals.
pub const SASL_MECHANISM: &str = "SCRAM-SHA-512";

/// Client configuration for consuming as `cluster_identity` with `credential`.
///
/// Offsets are stored explicitly after each handled message and committed in the background.
pub fn client_config(
    credential: &ConnectionCredential,
    cluster_identity: &str,
) -> Result<ClientConfig, ConsumerError> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &credential.bootstrap_server)
        .set("group.id", cluster_identity)
        .set("client.id", cluster_identity)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false");

    if let Some(ca) = &credential.ca_cert {
        config.set("ssl.ca.pem", ca);
    }
    let tls = credential.uses_tls();
    match &credential.principal {
        PrincipalCredential::Anonymous => {
            config.set("security.protocol", if tls { "ssl" } else { "plaintext" });
        }
        PrincipalCredential::Certificate { client_cert, client_key } => {
            config
                .set("security.protocol", "ssl")
                .set("ssl.certificate.pem", client_cert)
                .set("ssl.key.pem", client_key);
        }
        PrincipalCredential::Password { username, password } => {
            config
                .set("security.protocol", if tls { "sasl_ssl" } else { "sasl_plaintext" })
                .set("sasl.mechanism", SASL_MECHANISM)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        PrincipalCredential::SecretRef { name, namespace } => {
            return Err(ConsumerError::MissingCredential(format!(
                "kafka (credential secret {namespace}/{name} must be resolved before binding)"
            )));
        }
    }
    Ok(config)
}

/// [`BrokerBindingFactory`] producing [`KafkaBinding`]s.
#[derive(Clone, Debug, Default)]
pub struct KafkaBindingFactory {
    overrides: Vec<(String, String)>,
}

impl KafkaBindingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an extra client property, applied after the credential-derived ones.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }
}

impl BrokerBindingFactory for KafkaBindingFactory {
    fn bind(
        &self,
        credential: &ConnectionCredential,
        topics: &[String],
        cluster_identity: &str,
    ) -> Result<Box<dyn ReceiveBinding>, ConsumerError> {
        let mut config = client_config(credential, cluster_identity)?;
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| ConsumerError::Transport(format!("failed to create kafka consumer: {e}")))?;
        Ok(Box::new(KafkaBinding::new(consumer, topics.to_vec())))
    }
}

/// Receive binding over a bring-your-own `StreamConsumer`.
pub struct KafkaBinding {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl std::fmt::Debug for KafkaBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBinding").field("topics", &self.topics).finish()
    }
}

impl KafkaBinding {
    /// Wrap an existing consumer that will read `topics`.
    pub fn new(consumer: StreamConsumer, topics: Vec<String>) -> Self {
        Self { consumer, topics }
    }
}

#[async_trait]
impl ReceiveBinding for KafkaBinding {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn open(&mut self, start: &[StartPosition]) -> Result<(), ConsumerError> {
        if start.is_empty() {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            self.consumer
                .subscribe(&topics)
                .map_err(|e| ConsumerError::Transport(format!("failed to subscribe: {e}")))?;
            tracing::debug!(target: "hub_transport::consumer", ?topics, "kafka consumer subscribed");
            return Ok(());
        }

        let mut assignment = TopicPartitionList::new();
        for position in start {
            assignment
                .add_partition_offset(&position.topic, position.partition, Offset::Offset(position.offset))
                .map_err(|e| ConsumerError::Transport(format!("bad start position: {e}")))?;
        }
        self.consumer
            .assign(&assignment)
            .map_err(|e| ConsumerError::Transport(format!("failed to assign partitions: {e}")))?;
        tracing::debug!(target: "hub_transport::consumer", partitions = start.len(), "kafka consumer assigned");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| ConsumerError::Transport(format!("kafka receive failed: {e}")))?;

        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let envelope = match message.headers() {
            Some(headers) => Envelope::from_headers(
                headers.iter().filter_map(|h| h.value.map(|value| (h.key, value))),
                payload,
            ),
            None => Envelope::from_headers(std::iter::empty::<(&str, &[u8])>(), payload),
        };
        Ok(Some(Delivery {
            envelope,
            receipt: Receipt {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
        }))
    }

    async fn ack(&mut self, receipt: &Receipt) -> Result<(), ConsumerError> {
        self.consumer
            .store_offset(&receipt.topic, receipt.partition, receipt.offset + 1)
            .map_err(|e| ConsumerError::Transport(format!("failed to store offset: {e}")))
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(principal: PrincipalCredential, ca: Option<&str>) -> ConnectionCredential {
        ConnectionCredential {
            bootstrap_server: "kafka-0:9093,kafka-1:9093".into(),
            ca_cert: ca.map(str::to_string),
            principal,
        }
    }

    #[test]
    fn certificate_credential_configures_mutual_tls() {
        let cred = credential(
            PrincipalCredential::Certificate { client_cert: "CERT".into(), client_key: "KEY".into() },
            Some("CA"),
        );
        let config = client_config(&cred, "hub1").unwrap();
        assert_eq!(config.get("bootstrap.servers"), Some("kafka-0:9093,kafka-1:9093"));
        assert_eq!(config.get("group.id"), Some("hub1"));
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("ssl.ca.pem"), Some("CA"));
        assert_eq!(config.get("ssl.certificate.pem"), Some("CERT"));
        assert_eq!(config.get("ssl.key.pem"), Some("KEY"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
    }

    #[test]
    fn password_credential_uses_sasl() {
        let cred = credential(
            PrincipalCredential::Password { username: "u".into(), password: "p".into() },
            None,
        );
        let config = client_config(&cred, "hub1").unwrap();
        assert_eq!(config.get("security.protocol"), Some("sasl_plaintext"));
        assert_eq!(config.get("sasl.mechanism"), Some(SASL_MECHANISM));
        assert_eq!(config.get("sasl.username"), Some("u"));
        assert_eq!(config.get("ssl.ca.pem"), None);

        let tls = credential(
            PrincipalCredential::Password { username: "u".into(), password: "p".into() },
            Some("CA"),
        );
        assert_eq!(client_config(&tls, "hub1").unwrap().get("security.protocol"), Some("sasl_ssl"));
    }

    #[test]
    fn anonymous_and_unresolved_credentials() {
        let plain = client_config(&credential(PrincipalCredential::Anonymous, None), "hub1").unwrap();
        assert_eq!(plain.get("security.protocol"), Some("plaintext"));

        let err = client_config(
            &credential(
                PrincipalCredential::SecretRef { name: "kafka-user".into(), namespace: "hub".into() },
                None,
            ),
            "hub1",
        )
        .unwrap_err();
        assert!(matches!(err, ConsumerError::MissingCredential(_)));
    }

    #[test]
    fn overrides_apply_after_credential_properties() {
        let factory = KafkaBindingFactory::new().with_property("auto.offset.reset", "latest");
        assert_eq!(factory.overrides, vec![("auto.offset.reset".to_string(), "latest".to_string())]);
    }
}
