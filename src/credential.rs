//! Broker connection credentials handed from provisioners to consumers.

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::secret::Secret;

pub const KEY_BOOTSTRAP_SERVER: &str = "bootstrap_server";
pub const KEY_CA_CERT: &str = "ca.crt";
pub const KEY_CLIENT_CERT: &str = "client.crt";
pub const KEY_CLIENT_KEY: &str = "client.key";
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";

/// How the principal authenticates to the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrincipalCredential {
    /// No principal credential; the broker trusts the network or TLS alone.
    Anonymous,
    /// Mutual TLS with a client certificate/key in PEM.
    Certificate { client_cert: String, client_key: String },
    /// SASL username and password/token.
    Password { username: String, password: String },
    /// Credential material lives in another secret the consumer resolves itself.
    SecretRef { name: String, namespace: String },
}

/// Everything a client needs to connect. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCredential {
    /// Comma-separated bootstrap addresses.
    pub bootstrap_server: String,
    /// CA certificate in PEM, when the listener uses TLS.
    #[serde(default)]
    pub ca_cert: Option<String>,
    pub principal: PrincipalCredential,
}

impl ConnectionCredential {
    /// Parse a credential out of a bring-your-own transport secret.
    pub fn from_secret(secret: &Secret) -> Result<Self, ProvisionError> {
        let invalid = |reason: String| ProvisionError::InvalidSecret {
            name: format!("{}/{}", secret.namespace, secret.name),
            reason,
        };

        let bootstrap_server = secret
            .text(KEY_BOOTSTRAP_SERVER)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid(format!("missing {KEY_BOOTSTRAP_SERVER}")))?;

        let principal = match (
            secret.text(KEY_CLIENT_CERT),
            secret.text(KEY_CLIENT_KEY),
            secret.text(KEY_USERNAME),
            secret.text(KEY_PASSWORD),
        ) {
            (Some(client_cert), Some(client_key), _, _) => {
                PrincipalCredential::Certificate { client_cert, client_key }
            }
            (Some(_), None, _, _) | (None, Some(_), _, _) => {
                return Err(invalid(format!("{KEY_CLIENT_CERT} and {KEY_CLIENT_KEY} must be set together")))
            }
            (None, None, Some(username), Some(password)) => {
                PrincipalCredential::Password { username, password }
            }
            (None, None, Some(_), None) => return Err(invalid(format!("missing {KEY_PASSWORD}"))),
            (None, None, None, Some(_)) => return Err(invalid(format!("missing {KEY_USERNAME}"))),
            (None, None, None, None) => PrincipalCredential::Anonymous,
        };

        Ok(Self { bootstrap_server, ca_cert: secret.text(KEY_CA_CERT), principal })
    }

    /// Individual bootstrap addresses.
    pub fn bootstrap_servers(&self) -> Vec<&str> {
        self.bootstrap_server.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }

    pub fn uses_tls(&self) -> bool {
        self.ca_cert.is_some() || matches!(self.principal, PrincipalCredential::Certificate { .. })
    }
}
