//! Secret/config lookup used by protocol detection and bring-your-own credentials.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::SecretError;

/// A named bag of binary values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), data: BTreeMap::new() }
    }

    /// Builder-style insert of one key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Value of `key` as UTF-8 text, if present and valid.
    pub fn text(&self, key: &str) -> Option<String> {
        self.data.get(key).and_then(|v| String::from_utf8(v.clone()).ok())
    }
}

/// External secret store: `get(name, namespace) -> found | not-found | error`.
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, name: &str, namespace: &str) -> Result<Secret, SecretError>;
}

/// In-memory store for embedding and tests.
#[derive(Default, Clone, Debug)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<(String, String), Secret>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, secret: Secret) {
        let mut map = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        map.insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    pub fn remove(&self, name: &str, namespace: &str) -> Option<Secret> {
        let mut map = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        map.remove(&(namespace.to_string(), name.to_string()))
    }

    /// Make every lookup fail with `reason` until cleared with `None`.
    pub fn fail_lookups(&self, reason: Option<&str>) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Secret, SecretError> {
        if let Some(reason) = self.failure.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(SecretError::Lookup {
                name: name.to_string(),
                namespace: namespace.to_string(),
                reason,
            });
        }
        let map = self.secrets.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(namespace.to_string(), name.to_string())).cloned().ok_or_else(|| {
            SecretError::NotFound { name: name.to_string(), namespace: namespace.to_string() }
        })
    }
}
