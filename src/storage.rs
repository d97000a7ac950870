//! Storage provisioning collaborator run next to transport provisioning.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::ProvisionError;
use crate::secret::SecretStore;

pub const KEY_DATABASE_URI: &str = "database_uri";
pub const KEY_DATABASE_CA: &str = "ca.crt";

/// Connection details for the hub database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConnection {
    pub database_uri: String,
    pub ca_cert: Option<String>,
}

/// Ensures storage is usable and returns its connection.
#[async_trait]
pub trait StorageProvisioner: Send + Sync + std::fmt::Debug {
    async fn reconcile_storage(&self, cancel: &CancelToken) -> Result<StorageConnection, ProvisionError>;
}

/// Bring-your-own storage: the connection is read from the storage secret.
///
/// A missing secret reports not-ready so the host keeps requeueing until one appears.
#[derive(Debug, Clone)]
pub struct SecretStorageProvisioner {
    store: Arc<dyn SecretStore>,
    secret_name: String,
    namespace: String,
}

impl SecretStorageProvisioner {
    pub fn new(
        store: Arc<dyn SecretStore>,
        secret_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self { store, secret_name: secret_name.into(), namespace: namespace.into() }
    }
}

#[async_trait]
impl StorageProvisioner for SecretStorageProvisioner {
    async fn reconcile_storage(&self, _cancel: &CancelToken) -> Result<StorageConnection, ProvisionError> {
        let secret = match self.store.get(&self.secret_name, &self.namespace).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                return Err(ProvisionError::not_ready(format!(
                    "storage secret {}/{} not found",
                    self.namespace, self.secret_name
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let database_uri = secret.text(KEY_DATABASE_URI).filter(|s| !s.is_empty()).ok_or_else(|| {
            ProvisionError::InvalidSecret {
                name: format!("{}/{}", self.namespace, self.secret_name),
                reason: format!("missing {KEY_DATABASE_URI}"),
            }
        })?;
        Ok(StorageConnection { database_uri, ca_cert: secret.text(KEY_DATABASE_CA) })
    }
}
