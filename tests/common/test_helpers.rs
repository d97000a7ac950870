use async_trait::async_trait;
use hub_transport::config::{DEFAULT_NAMESPACE, STORAGE_SECRET_NAME, TRANSPORT_SECRET_NAME};
use hub_transport::consumer::{
    BrokerBindingFactory, Delivery, Receipt, ReceiveBinding, StartPosition,
};
use hub_transport::{
    ConnectionCredential, ConsumerError, Envelope, InMemoryControlPlane, InMemorySecretStore,
    Orchestrator, Secret, SecretStorageProvisioner, TransportSettings,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A hub wired to in-memory collaborators that tests can inspect.
pub struct Hub {
    pub secrets: InMemorySecretStore,
    pub control_plane: InMemoryControlPlane,
    pub orchestrator: Orchestrator,
}

pub fn hub(settings: TransportSettings, control_plane: InMemoryControlPlane) -> Hub {
    let secrets = InMemorySecretStore::new();
    let storage = SecretStorageProvisioner::new(
        Arc::new(secrets.clone()),
        settings.storage_secret.clone(),
        settings.namespace.clone(),
    );
    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(secrets.clone()),
        Arc::new(control_plane.clone()),
        Arc::new(storage),
    );
    Hub { secrets, control_plane, orchestrator }
}

pub fn transport_secret() -> Secret {
    Secret::new(TRANSPORT_SECRET_NAME, DEFAULT_NAMESPACE)
        .with("bootstrap_server", "byo-kafka:9093")
        .with("ca.crt", "BYO CA")
        .with("client.crt", "BYO CERT")
        .with("client.key", "BYO KEY")
}

pub fn storage_secret() -> Secret {
    Secret::new(STORAGE_SECRET_NAME, DEFAULT_NAMESPACE)
        .with("database_uri", "postgres://hub@db:5432/hub")
}

pub fn delivery(envelope: Envelope, topic: &str, partition: i32, offset: i64) -> Delivery {
    Delivery {
        envelope: Ok(envelope),
        receipt: Receipt { topic: topic.to_string(), partition, offset },
    }
}

/// What a [`ScriptedFactory`] binding saw.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub bound: Vec<(Vec<String>, String)>,
    pub opened: Vec<Vec<StartPosition>>,
    pub acked: Vec<Receipt>,
    pub closed: usize,
}

pub type Feed = mpsc::Sender<Result<Delivery, ConsumerError>>;

/// Broker binding factory whose single binding replays whatever the test feeds it.
#[derive(Debug)]
pub struct ScriptedFactory {
    pub log: Arc<Mutex<Recorded>>,
    rx: Mutex<Option<mpsc::Receiver<Result<Delivery, ConsumerError>>>>,
}

impl ScriptedFactory {
    pub fn new() -> (Arc<Self>, Feed) {
        let (tx, rx) = mpsc::channel(16);
        let factory =
            Arc::new(Self { log: Arc::default(), rx: Mutex::new(Some(rx)) });
        (factory, tx)
    }

    pub fn recorded(&self) -> Recorded {
        self.log.lock().unwrap().clone()
    }
}

impl BrokerBindingFactory for ScriptedFactory {
    fn bind(
        &self,
        _credential: &ConnectionCredential,
        topics: &[String],
        cluster_identity: &str,
    ) -> Result<Box<dyn ReceiveBinding>, ConsumerError> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConsumerError::Transport("scripted binding already bound".into()))?;
        self.log.lock().unwrap().bound.push((topics.to_vec(), cluster_identity.to_string()));
        Ok(Box::new(ScriptedBinding { log: self.log.clone(), rx }))
    }
}

struct ScriptedBinding {
    log: Arc<Mutex<Recorded>>,
    rx: mpsc::Receiver<Result<Delivery, ConsumerError>>,
}

#[async_trait]
impl ReceiveBinding for ScriptedBinding {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&mut self, start: &[StartPosition]) -> Result<(), ConsumerError> {
        self.log.lock().unwrap().opened.push(start.to_vec());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        match self.rx.recv().await {
            Some(Ok(delivery)) => Ok(Some(delivery)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, receipt: &Receipt) -> Result<(), ConsumerError> {
        self.log.lock().unwrap().acked.push(receipt.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}
