//! Error types for provisioning and consumption.
//!
//! Transient failures (`ProvisionError::NotReady`, control-plane hiccups) are retried by the
//! caller; `DetectionError` and `ConsumerError::UnsupportedProtocol` are configuration level and
//! surface immediately.
use std::time::Duration;
use thiserror::Error;

/// Failure looking up a secret in the external secret/config store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    /// The store answered, and the secret does not exist.
    #[error("secret {namespace}/{name} not found")]
    NotFound { name: String, namespace: String },
    /// The store could not answer.
    #[error("secret lookup {namespace}/{name} failed: {reason}")]
    Lookup { name: String, namespace: String, reason: String },
}

impl SecretError {
    /// Check if the secret is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Protocol detection failed; fatal for the current pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to detect transport protocol: {source}")]
pub struct DetectionError {
    #[source]
    pub source: SecretError,
}

/// Failures raised while provisioning a transport or storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// The broker control plane rejected or failed a call.
    #[error("control plane error: {0}")]
    ControlPlane(String),
    /// Secret store failure while reading credentials.
    #[error(transparent)]
    Secret(#[from] SecretError),
    /// A secret exists but its contents cannot be used.
    #[error("invalid secret {name}: {reason}")]
    InvalidSecret { name: String, reason: String },
    /// The resource exists but is not usable yet.
    #[error("not ready: {reason}")]
    NotReady { reason: String },
    /// Polling gave up; `last` is the final observed failure.
    #[error("timed out after {elapsed:?} (limit: {timeout:?}); last error: {last}")]
    Timeout { elapsed: Duration, timeout: Duration, last: Box<ProvisionError> },
    /// The caller cancelled the operation.
    #[error("provisioning cancelled")]
    Cancelled,
}

impl ProvisionError {
    /// Shorthand for a [`ProvisionError::NotReady`].
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady { reason: reason.into() }
    }

    /// Check if this error is a not-ready signal.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Check if polling timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Access timeout details as `(elapsed, timeout)`.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout, .. } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }
}

/// Failures constructing or running a [`GenericConsumer`](crate::GenericConsumer).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumerError {
    /// Configuration names a transport this crate cannot bind.
    #[error("transport-type - {0} is not a valid option")]
    UnsupportedProtocol(String),
    /// A broker protocol was requested but no broker binding factory was supplied.
    #[error("no broker binding configured for transport {0}")]
    MissingBrokerBinding(String),
    /// A broker protocol was requested without a connection credential.
    #[error("transport {0} requires a connection credential")]
    MissingCredential(String),
    /// The underlying transport failed; the receive loop stops.
    #[error("transport error: {0}")]
    Transport(String),
    /// The offset store query failed at start.
    #[error("offset query failed: {0}")]
    OffsetQuery(String),
    /// `start` was called more than once.
    #[error("consumer already started")]
    AlreadyStarted,
}

/// A chunk group is inconsistent. The offending chunk is dropped; the receive loop keeps running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("chunk group {group}: total {got} does not match expected {expected}")]
    TotalMismatch { group: String, expected: usize, got: usize },
    #[error("chunk group {group}: index {index} out of range for total {total}")]
    IndexOutOfRange { group: String, index: usize, total: usize },
    #[error("chunk group {group}: total must be > 0")]
    EmptyGroup { group: String },
}

/// One failed task of a middleware reconciliation pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MiddlewareError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("transport: {0}")]
    Transport(#[source] ProvisionError),
    #[error("storage: {0}")]
    Storage(#[source] ProvisionError),
    /// The managed control-plane watcher has no connection yet; expected on early passes.
    #[error("the transport control-plane watcher is not ready")]
    ControllerNotReady,
    /// A provisioning task panicked or was aborted.
    #[error("{task} task aborted: {reason}")]
    TaskAborted { task: &'static str, reason: String },
}

impl MiddlewareError {
    /// Transient failures are expected to clear on a later pass.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ControllerNotReady => true,
            Self::Transport(e) | Self::Storage(e) => {
                e.is_not_ready() || e.is_timeout() || matches!(e, ProvisionError::ControlPlane(_))
            }
            Self::Detection(_) | Self::TaskAborted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn detection_error_exposes_lookup_source() {
        let err = DetectionError {
            source: SecretError::Lookup {
                name: "transport".into(),
                namespace: "hub".into(),
                reason: "forbidden".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("detect transport protocol"));
        assert!(msg.contains("forbidden"));
        assert!(err.source().is_some());
    }

    #[test]
    fn timeout_display_includes_last_error() {
        let err = ProvisionError::Timeout {
            elapsed: Duration::from_secs(600),
            timeout: Duration::from_secs(600),
            last: Box::new(ProvisionError::not_ready("kafka user secret missing")),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("kafka user secret missing"));
        assert!(err.is_timeout());
        assert_eq!(
            err.timeout_details(),
            Some((Duration::from_secs(600), Duration::from_secs(600)))
        );
    }

    #[test]
    fn predicates_cover_variants() {
        assert!(ProvisionError::not_ready("x").is_not_ready());
        assert!(ProvisionError::Cancelled.is_cancelled());
        assert!(!ProvisionError::ControlPlane("boom".into()).is_not_ready());
        let missing = SecretError::NotFound { name: "a".into(), namespace: "b".into() };
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "secret b/a not found");
    }

    #[test]
    fn unsupported_protocol_names_the_value() {
        let err = ConsumerError::UnsupportedProtocol("carrier-pigeon".into());
        assert_eq!(err.to_string(), "transport-type - carrier-pigeon is not a valid option");
    }

    #[test]
    fn middleware_errors_classify_transience() {
        assert!(MiddlewareError::ControllerNotReady.is_transient());
        assert!(MiddlewareError::Storage(ProvisionError::not_ready("db")).is_transient());
        let detection = MiddlewareError::from(DetectionError {
            source: SecretError::Lookup { name: "t".into(), namespace: "n".into(), reason: "x".into() },
        });
        assert!(!detection.is_transient());
        assert!(detection.to_string().contains("detect transport protocol"));
    }
}
