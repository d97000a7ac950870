//! Settings and well-known names shared by the provisioner, orchestrator, and consumer.

use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Secret that, when present, carries a bring-your-own broker credential.
pub const TRANSPORT_SECRET_NAME: &str = "multicluster-global-hub-transport";
/// Secret that, when present, carries a bring-your-own storage connection.
pub const STORAGE_SECRET_NAME: &str = "multicluster-global-hub-storage";
/// Namespace the hub runs in.
pub const DEFAULT_NAMESPACE: &str = "multicluster-global-hub";
/// Principal the hub uses to talk to the broker.
pub const DEFAULT_PRINCIPAL: &str = "global-hub-kafka-user";
/// Logical cluster identity of the hub itself.
pub const HUB_CLUSTER_IDENTITY: &str = "global";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Errors loading settings from the environment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Tunables for one hub instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub namespace: String,
    pub transport_secret: String,
    pub storage_secret: String,
    pub principal: String,
    pub hub_identity: String,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    #[serde(with = "duration_secs")]
    pub credential_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub requeue_after: Duration,
    /// Apply broker metric side-resources on the managed path.
    pub enable_metrics: bool,
    /// Install the community operator instead of the product one.
    pub community: bool,
    /// Output queue capacity of a consumer; clamped to at least 1.
    pub output_capacity: usize,
    /// Incomplete chunk groups older than this are evicted. `None` keeps them until completion.
    #[serde(with = "opt_duration_secs")]
    pub assembly_ttl: Option<Duration>,
    pub enable_offset_recovery: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            transport_secret: TRANSPORT_SECRET_NAME.to_string(),
            storage_secret: STORAGE_SECRET_NAME.to_string(),
            principal: DEFAULT_PRINCIPAL.to_string(),
            hub_identity: HUB_CLUSTER_IDENTITY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            credential_timeout: DEFAULT_CREDENTIAL_TIMEOUT,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            enable_metrics: false,
            community: false,
            output_capacity: 1,
            assembly_ttl: None,
            enable_offset_recovery: false,
        }
    }
}

impl TransportSettings {
    /// Defaults overridden by `HUB_TRANSPORT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = lookup("HUB_TRANSPORT_NAMESPACE") {
            settings.namespace = v;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_SECRET") {
            settings.transport_secret = v;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_STORAGE_SECRET") {
            settings.storage_secret = v;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_PRINCIPAL") {
            settings.principal = v;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_HUB_IDENTITY") {
            settings.hub_identity = v;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_POLL_INTERVAL_SECS") {
            settings.poll_interval = parse_secs("HUB_TRANSPORT_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_CREDENTIAL_TIMEOUT_SECS") {
            settings.credential_timeout = parse_secs("HUB_TRANSPORT_CREDENTIAL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_REQUEUE_AFTER_SECS") {
            settings.requeue_after = parse_secs("HUB_TRANSPORT_REQUEUE_AFTER_SECS", &v)?;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_ENABLE_METRICS") {
            settings.enable_metrics = parse_bool("HUB_TRANSPORT_ENABLE_METRICS", &v)?;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_COMMUNITY") {
            settings.community = parse_bool("HUB_TRANSPORT_COMMUNITY", &v)?;
        }
        if let Some(v) = lookup("HUB_TRANSPORT_OUTPUT_CAPACITY") {
            let capacity: usize = v.parse().map_err(|e| ConfigError::Invalid {
                var: "HUB_TRANSPORT_OUTPUT_CAPACITY",
                reason: format!("{e}"),
            })?;
            settings.output_capacity = capacity.max(1);
        }
        if let Some(v) = lookup("HUB_TRANSPORT_ASSEMBLY_TTL_SECS") {
            settings.assembly_ttl = Some(parse_secs("HUB_TRANSPORT_ASSEMBLY_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("HUB_TRANSPORT_OFFSET_RECOVERY") {
            settings.enable_offset_recovery = parse_bool("HUB_TRANSPORT_OFFSET_RECOVERY", &v)?;
        }

        Ok(settings)
    }
}

fn parse_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 =
        raw.trim().parse().map_err(|e| ConfigError::Invalid { var, reason: format!("{e}") })?;
    if secs == 0 {
        return Err(ConfigError::Invalid { var, reason: "must be greater than zero".into() });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid { var, reason: format!("not a boolean: {other}") }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
