//! Middleware reconciliation: transport and storage provisioning as one joint pass.
//!
//! Each pass spawns exactly two tasks and waits for both. Neither cancels the other, and each
//! writes only its own field of the shared [`MiddlewareConfig`], so a result obtained by one
//! task survives the other's failure. Any failure turns the pass into a [`Requeue`].
//!
//! Managed transports get a [`ControlPlaneWatcher`] installed on the first pass. It keeps the
//! connection credential current in the background; until it has one, passes requeue with
//! [`MiddlewareError::ControllerNotReady`]. The watcher is stopped when a pass detects another
//! protocol, and replaced when the managed transporter is rebuilt.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cancel::{cancel_pair, CancelToken, Canceller};
use crate::config::TransportSettings;
use crate::consumer::{BrokerBindingFactory, TransportConfig};
use crate::control_plane::BrokerControlPlane;
use crate::credential::ConnectionCredential;
use crate::error::{MiddlewareError, ProvisionError};
use crate::protocol::{detect, TransportProtocol};
use crate::secret::SecretStore;
use crate::storage::{StorageConnection, StorageProvisioner};
use crate::transporter::{
    provision, provision_resources, ByoTransporter, ManagedTransporter, Transporter,
};
use crate::waiter::wait_for_credential;

/// How often the watcher re-reads a credential it already has.
pub const CONNECTION_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Provisioned middleware, shared with later passes and downstream consumers.
#[derive(Clone, Debug, Default)]
pub struct MiddlewareConfig {
    pub transport_conn: Option<ConnectionCredential>,
    pub storage_conn: Option<StorageConnection>,
    pub transporter: Option<Arc<dyn Transporter>>,
}

impl MiddlewareConfig {
    /// Broker consumer configuration for `cluster_identity`, once a transport is provisioned.
    pub fn transport_config(
        &self,
        cluster_identity: &str,
        factory: Arc<dyn BrokerBindingFactory>,
    ) -> Option<TransportConfig> {
        let credential = self.transport_conn.clone()?;
        let protocol = self.transporter.as_ref()?.protocol();
        Some(TransportConfig::broker(protocol, credential, cluster_identity, factory))
    }

    /// Both transport and storage are provisioned.
    pub fn is_ready(&self) -> bool {
        self.transport_conn.is_some() && self.storage_conn.is_some()
    }
}

/// A failed pass: retry after `after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requeue {
    pub after: Duration,
    pub errors: Vec<MiddlewareError>,
}

impl Requeue {
    /// Whether every error is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        self.errors.iter().all(MiddlewareError::is_transient)
    }
}

impl fmt::Display for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "middleware not ready: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Requeue {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Background poller that publishes the managed transport's connection credential.
#[derive(Clone, Debug)]
pub struct ControlPlaneWatcher {
    rx: watch::Receiver<Option<ConnectionCredential>>,
}

impl ControlPlaneWatcher {
    /// Start polling `transporter` for the credential of `settings.principal` until `shutdown`.
    pub fn spawn(
        transporter: Arc<dyn Transporter>,
        settings: &TransportSettings,
        shutdown: CancelToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let principal = settings.principal.clone();
        let interval = settings.poll_interval;
        let timeout = settings.credential_timeout;

        tokio::spawn(async move {
            info!(target: "hub_transport::orchestrator", %principal, "control-plane watcher started");
            loop {
                let attempt = {
                    let transporter = transporter.as_ref();
                    let principal = principal.as_str();
                    wait_for_credential(
                        move || transporter.get_conn_credential(principal),
                        interval,
                        timeout,
                        &shutdown,
                    )
                    .await
                };
                match attempt {
                    Ok(credential) => {
                        let changed = tx.send_if_modified(|current| {
                            if current.as_ref() == Some(&credential) {
                                return false;
                            }
                            *current = Some(credential);
                            true
                        });
                        if changed {
                            info!(target: "hub_transport::orchestrator", %principal, "transport connection updated");
                        }
                    }
                    Err(ProvisionError::Cancelled) => break,
                    Err(e) => {
                        warn!(target: "hub_transport::orchestrator", %principal, error = %e, "transport connection not available");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(CONNECTION_REFRESH_INTERVAL) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!(target: "hub_transport::orchestrator", "control-plane watcher stopped");
        });

        Self { rx }
    }

    /// Latest connection credential, if one has been read.
    pub fn connection(&self) -> Option<ConnectionCredential> {
        self.rx.borrow().clone()
    }
}

/// Runs middleware reconciliation passes for one hub. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    settings: TransportSettings,
    secrets: Arc<dyn SecretStore>,
    control_plane: Arc<dyn BrokerControlPlane>,
    storage: Arc<dyn StorageProvisioner>,
    state: RwLock<MiddlewareConfig>,
    watcher: Mutex<Option<InstalledWatcher>>,
}

/// A running watcher and the transporter it polls. Dropping it stops the watcher.
#[derive(Debug)]
struct InstalledWatcher {
    watcher: ControlPlaneWatcher,
    transporter: Arc<dyn Transporter>,
    stop: Canceller,
}

impl Drop for InstalledWatcher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl Orchestrator {
    pub fn new(
        settings: TransportSettings,
        secrets: Arc<dyn SecretStore>,
        control_plane: Arc<dyn BrokerControlPlane>,
        storage: Arc<dyn StorageProvisioner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                secrets,
                control_plane,
                storage,
                state: RwLock::new(MiddlewareConfig::default()),
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.inner.settings
    }

    /// Snapshot of what has been provisioned so far.
    pub fn middleware_config(&self) -> MiddlewareConfig {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The managed watcher, while the last pass detected a managed transport.
    pub fn watcher(&self) -> Option<ControlPlaneWatcher> {
        self.installed_watcher().as_ref().map(|installed| installed.watcher.clone())
    }

    /// One reconciliation pass. `Ok(())` means transport and storage are both ready.
    pub async fn reconcile_middleware(&self, cancel: &CancelToken) -> Result<(), Requeue> {
        let (tx, mut rx) = mpsc::channel::<MiddlewareError>(2);

        let transport = {
            let this = self.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = this.reconcile_transport(&cancel).await {
                    let _ = tx.send(e).await;
                }
            })
        };
        let storage = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = this.reconcile_storage(&cancel).await {
                    let _ = tx.send(e).await;
                }
            })
        };

        let mut aborted = Vec::new();
        for (task, handle) in [("transport", transport), ("storage", storage)] {
            if let Err(e) = handle.await {
                aborted.push(MiddlewareError::TaskAborted { task, reason: e.to_string() });
            }
        }

        let mut errors = Vec::with_capacity(2);
        while let Ok(e) = rx.try_recv() {
            errors.push(e);
        }
        errors.extend(aborted);

        if errors.is_empty() {
            info!(target: "hub_transport::orchestrator", "middleware is ready");
            return Ok(());
        }
        let requeue = Requeue { after: self.inner.settings.requeue_after, errors };
        debug!(
            target: "hub_transport::orchestrator",
            after = ?requeue.after,
            error = %requeue,
            "requeueing middleware reconciliation"
        );
        Err(requeue)
    }

    async fn reconcile_transport(&self, cancel: &CancelToken) -> Result<(), MiddlewareError> {
        let settings = &self.inner.settings;
        let protocol =
            detect(self.inner.secrets.as_ref(), &settings.transport_secret, &settings.namespace)
                .await?;
        let transporter = self.transporter_for(protocol);

        let credential = match protocol {
            TransportProtocol::Managed => {
                provision_resources(transporter.as_ref(), settings)
                    .await
                    .map_err(MiddlewareError::Transport)?;
                let watcher = self.ensure_watcher(&transporter);
                watcher.connection().ok_or(MiddlewareError::ControllerNotReady)?
            }
            TransportProtocol::BringYourOwn | TransportProtocol::InProcess => {
                self.stop_watcher();
                provision(transporter.as_ref(), settings, cancel)
                    .await
                    .map_err(MiddlewareError::Transport)?
            }
        };

        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        state.transport_conn = Some(credential);
        Ok(())
    }

    async fn reconcile_storage(&self, cancel: &CancelToken) -> Result<(), MiddlewareError> {
        let conn = self
            .inner
            .storage
            .reconcile_storage(cancel)
            .await
            .map_err(MiddlewareError::Storage)?;
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        state.storage_conn = Some(conn);
        Ok(())
    }

    /// Watcher for `transporter`, installing it (or replacing one bound to an older transporter).
    fn ensure_watcher(&self, transporter: &Arc<dyn Transporter>) -> ControlPlaneWatcher {
        let mut slot = self.installed_watcher();
        if let Some(installed) = slot.as_ref().filter(|i| Arc::ptr_eq(&i.transporter, transporter)) {
            return installed.watcher.clone();
        }
        let (stop, token) = cancel_pair();
        let watcher = ControlPlaneWatcher::spawn(transporter.clone(), &self.inner.settings, token);
        *slot = Some(InstalledWatcher { watcher: watcher.clone(), transporter: transporter.clone(), stop });
        watcher
    }

    fn stop_watcher(&self) {
        if self.installed_watcher().take().is_some() {
            info!(target: "hub_transport::orchestrator", "control-plane watcher removed");
        }
    }

    fn installed_watcher(&self) -> std::sync::MutexGuard<'_, Option<InstalledWatcher>> {
        self.inner.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reuse the stored transporter while the protocol is unchanged; otherwise build one.
    fn transporter_for(&self, protocol: TransportProtocol) -> Arc<dyn Transporter> {
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state.transporter.as_ref().filter(|t| t.protocol() == protocol) {
            return existing.clone();
        }

        let settings = &self.inner.settings;
        let transporter: Arc<dyn Transporter> = match protocol {
            TransportProtocol::Managed => Arc::new(
                ManagedTransporter::new(self.inner.control_plane.clone(), settings.namespace.clone())
                    .with_community(settings.community)
                    .with_metrics(settings.enable_metrics),
            ),
            TransportProtocol::BringYourOwn | TransportProtocol::InProcess => Arc::new(ByoTransporter::new(
                self.inner.secrets.clone(),
                settings.transport_secret.clone(),
                settings.namespace.clone(),
            )),
        };
        info!(target: "hub_transport::orchestrator", %protocol, "transport protocol selected");
        state.transporter = Some(transporter.clone());
        transporter
    }
}
