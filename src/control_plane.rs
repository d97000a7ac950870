//! Broker control-plane API consumed by the managed provisioner.
//!
//! Every mutating call is idempotent: creating something that exists succeeds without change.
//! `read_credential` distinguishes a transient [`ProvisionError::NotReady`] from hard failures.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::credential::{ConnectionCredential, PrincipalCredential};
use crate::error::ProvisionError;
use crate::topic::Grant;

/// Operator subscription that installs the broker control plane.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription {
    pub package: String,
    pub channel: String,
    pub catalog_source: String,
    pub namespace: String,
}

/// A side-resource (monitor, dashboard config) applied next to the broker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[async_trait]
pub trait BrokerControlPlane: Send + Sync + std::fmt::Debug {
    /// Install the control-plane subscription if it is not present.
    async fn ensure_subscription(&self, subscription: &Subscription) -> Result<(), ProvisionError>;
    /// Create or update side-resources.
    async fn apply_resources(&self, resources: &[ManagedResource]) -> Result<(), ProvisionError>;
    async fn create_principal(&self, principal: &str) -> Result<(), ProvisionError>;
    async fn create_topic(&self, topic: &str) -> Result<(), ProvisionError>;
    async fn grant(&self, grant: &Grant) -> Result<(), ProvisionError>;
    async fn read_credential(&self, principal: &str) -> Result<ConnectionCredential, ProvisionError>;
}

/// Most recent calls kept by [`InMemoryControlPlane::calls`].
pub const CALL_LOG_CAPACITY: usize = 256;

/// One recorded control-plane call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlPlaneCall {
    EnsureSubscription(String),
    ApplyResources(Vec<String>),
    CreatePrincipal(String),
    CreateTopic(String),
    Grant(Grant),
    ReadCredential(String),
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    subscriptions: BTreeSet<Subscription>,
    resources: BTreeSet<ManagedResource>,
    principals: BTreeSet<String>,
    topics: BTreeSet<String>,
    grants: BTreeSet<Grant>,
    calls: VecDeque<ControlPlaneCall>,
    credential_reads: usize,
    pending_reads: usize,
    failing_topic: Option<String>,
}

impl ControlPlaneState {
    fn record(&mut self, call: ControlPlaneCall) {
        if matches!(call, ControlPlaneCall::ReadCredential(_)) {
            self.credential_reads += 1;
        }
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// In-memory control plane for embedding and tests.
///
/// The call log keeps the last [`CALL_LOG_CAPACITY`] calls.
///
/// Credentials become readable once the principal exists and holds at least one grant, and
/// after `not_ready_reads` earlier reads have reported not-ready.
#[derive(Clone, Debug)]
pub struct InMemoryControlPlane {
    bootstrap_server: String,
    state: Arc<RwLock<ControlPlaneState>>,
}

impl InMemoryControlPlane {
    pub fn new(bootstrap_server: impl Into<String>) -> Self {
        Self { bootstrap_server: bootstrap_server.into(), state: Arc::default() }
    }

    /// Report not-ready for the next `reads` credential reads regardless of state.
    pub fn not_ready_reads(self, reads: usize) -> Self {
        self.write().pending_reads = reads;
        self
    }

    /// Make `create_topic` fail for `topic`.
    pub fn fail_topic(&self, topic: Option<&str>) {
        self.write().failing_topic = topic.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.read().calls.iter().cloned().collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.read().topics.iter().cloned().collect()
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.read().grants.iter().cloned().collect()
    }

    pub fn principals(&self) -> Vec<String> {
        self.read().principals.iter().cloned().collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.read().subscriptions.iter().cloned().collect()
    }

    pub fn resources(&self) -> Vec<ManagedResource> {
        self.read().resources.iter().cloned().collect()
    }

    /// Number of credential reads served so far.
    pub fn credential_reads(&self) -> usize {
        self.read().credential_reads
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ControlPlaneState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ControlPlaneState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BrokerControlPlane for InMemoryControlPlane {
    async fn ensure_subscription(&self, subscription: &Subscription) -> Result<(), ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::EnsureSubscription(subscription.package.clone()));
        state.subscriptions.insert(subscription.clone());
        Ok(())
    }

    async fn apply_resources(&self, resources: &[ManagedResource]) -> Result<(), ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::ApplyResources(resources.iter().map(|r| r.name.clone()).collect()));
        state.resources.extend(resources.iter().cloned());
        Ok(())
    }

    async fn create_principal(&self, principal: &str) -> Result<(), ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::CreatePrincipal(principal.to_string()));
        state.principals.insert(principal.to_string());
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> Result<(), ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::CreateTopic(topic.to_string()));
        if state.failing_topic.as_deref() == Some(topic) {
            return Err(ProvisionError::ControlPlane(format!("failed to create topic {topic}")));
        }
        state.topics.insert(topic.to_string());
        Ok(())
    }

    async fn grant(&self, grant: &Grant) -> Result<(), ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::Grant(grant.clone()));
        if !state.principals.contains(&grant.principal) {
            return Err(ProvisionError::ControlPlane(format!(
                "principal {} does not exist",
                grant.principal
            )));
        }
        state.grants.insert(grant.clone());
        Ok(())
    }

    async fn read_credential(&self, principal: &str) -> Result<ConnectionCredential, ProvisionError> {
        let mut state = self.write();
        state.record(ControlPlaneCall::ReadCredential(principal.to_string()));
        if state.pending_reads > 0 {
            state.pending_reads -= 1;
            return Err(ProvisionError::not_ready(format!("credential for {principal} is not issued yet")));
        }
        if !state.principals.contains(principal) {
            return Err(ProvisionError::not_ready(format!("principal {principal} does not exist")));
        }
        if !state.grants.iter().any(|g| g.principal == principal) {
            return Err(ProvisionError::not_ready(format!("principal {principal} has no grants")));
        }
        Ok(ConnectionCredential {
            bootstrap_server: self.bootstrap_server.clone(),
            ca_cert: Some(format!("ca for {}", self.bootstrap_server)),
            principal: PrincipalCredential::Certificate {
                client_cert: format!("cert for {principal}"),
                client_key: format!("key for {principal}"),
            },
        })
    }
}
