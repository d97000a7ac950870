//! Transport protocol selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConsumerError, DetectionError};
use crate::secret::SecretStore;

/// Which transport integration a running instance uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportProtocol {
    /// An externally supplied broker credential secret exists.
    BringYourOwn,
    /// The hub provisions its own broker principals and topics through a control plane.
    Managed,
    /// Single-process channel transport; no broker.
    InProcess,
}

impl TransportProtocol {
    /// Whether this protocol talks to a real broker.
    pub fn is_broker(&self) -> bool {
        !matches!(self, Self::InProcess)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BringYourOwn => write!(f, "bring-your-own"),
            Self::Managed => write!(f, "managed"),
            Self::InProcess => write!(f, "in-process"),
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bring-your-own" | "byo" | "secret" => Ok(Self::BringYourOwn),
            "managed" | "strimzi" | "kafka" => Ok(Self::Managed),
            "in-process" | "chan" | "channel" => Ok(Self::InProcess),
            _ => Err(ConsumerError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Pick the protocol by looking for the bring-your-own transport secret, exactly once.
///
/// Found → `BringYourOwn`; not found → `Managed`; anything else is a [`DetectionError`].
pub async fn detect(
    store: &dyn SecretStore,
    secret_name: &str,
    namespace: &str,
) -> Result<TransportProtocol, DetectionError> {
    match store.get(secret_name, namespace).await {
        Ok(_) => {
            debug!(target: "hub_transport::provision", secret = secret_name, "transport secret found");
            Ok(TransportProtocol::BringYourOwn)
        }
        Err(e) if e.is_not_found() => Ok(TransportProtocol::Managed),
        Err(source) => Err(DetectionError { source }),
    }
}
