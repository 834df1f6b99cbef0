use crate::RegistryError;
use models::CompatibilityLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// The default port a node advertises when no listener is configured.
pub const DEFAULT_PORT: u16 = 8081;

/// How one registry node addresses another, for leader forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Node configuration. Every field has a serde default so deployments list
/// only what they override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Whether this node may become leader.
    #[serde(default = "default_true")]
    pub leader_eligibility: bool,
    /// Defer leader election until `post_init`.
    #[serde(default)]
    pub leader_election_delay: bool,
    /// Whether `set_mode` calls are accepted.
    #[serde(default = "default_true")]
    pub mode_mutability: bool,

    /// Producer-ack and read-barrier deadline.
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    pub store_timeout: Duration,
    /// Catch-up deadline on a transition into leadership.
    #[serde(with = "humantime_serde", default = "default_init_timeout")]
    pub init_timeout: Duration,
    /// Maximum id-collision retries during registration.
    #[serde(default = "default_write_max_retries")]
    pub write_max_retries: u32,
    /// Upper bound on one serialized log record.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    #[serde(default = "default_schema_cache_size")]
    pub schema_cache_size: usize,
    #[serde(with = "humantime_serde", default = "default_schema_cache_expiry")]
    pub schema_cache_expiry: Duration,

    /// Global default compatibility level.
    #[serde(default = "default_compatibility_level")]
    pub compatibility_level: CompatibilityLevel,

    /// Schema types served beyond the built-in AVRO and JSON. Each tag
    /// selects a provider implementation supplied at startup.
    #[serde(default)]
    pub schema_providers: Vec<String>,
    /// Named log-apply side effects to run, selected from the handlers
    /// supplied at startup.
    #[serde(default)]
    pub update_handlers: Vec<String>,

    #[serde(default = "default_host_name")]
    pub host_name: String,
    /// Listener URLs; the scheme doubles as the listener name.
    #[serde(default)]
    pub listeners: Vec<Url>,
    /// Preferred listener name for inter-node traffic.
    #[serde(default)]
    pub inter_instance_listener_name: Option<String>,
    #[serde(default = "default_protocol")]
    pub inter_instance_protocol: String,
}

fn default_true() -> bool {
    true
}
fn default_store_timeout() -> Duration {
    Duration::from_millis(500)
}
fn default_init_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_write_max_retries() -> u32 {
    5
}
fn default_max_record_bytes() -> usize {
    1 << 20
}
fn default_schema_cache_size() -> usize {
    1000
}
fn default_schema_cache_expiry() -> Duration {
    Duration::from_secs(300)
}
fn default_compatibility_level() -> CompatibilityLevel {
    CompatibilityLevel::Backward
}
fn default_host_name() -> String {
    "localhost".to_string()
}
fn default_protocol() -> String {
    "http".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({}))
            .expect("an empty config deserializes through field defaults")
    }
}

impl RegistryConfig {
    /// The identity this node advertises to its peers: the first listener
    /// matching the named inter-instance listener, else the last listener
    /// with the inter-instance scheme, else the configured host name.
    pub fn identity(&self) -> Result<NodeIdentity, RegistryError> {
        let from_listener = |listener: &Url| -> Result<NodeIdentity, RegistryError> {
            let host = listener
                .host_str()
                .ok_or_else(|| {
                    RegistryError::Initialization(format!("listener {listener} has no host"))
                })?
                .to_string();
            let port = listener.port().unwrap_or(DEFAULT_PORT);
            Ok(NodeIdentity {
                scheme: self.inter_instance_protocol.clone(),
                host,
                port,
            })
        };

        if let Some(name) = &self.inter_instance_listener_name {
            let name = name.to_ascii_lowercase();
            if let Some(listener) = self.listeners.iter().find(|l| l.scheme() == name) {
                return from_listener(listener);
            }
            return Err(RegistryError::Initialization(format!(
                "no listener named {name:?} is configured"
            )));
        }

        if let Some(listener) = self
            .listeners
            .iter()
            .filter(|l| l.scheme() == self.inter_instance_protocol)
            .last()
        {
            return from_listener(listener);
        }

        Ok(NodeIdentity {
            scheme: self.inter_instance_protocol.clone(),
            host: self.host_name.clone(),
            port: DEFAULT_PORT,
        })
    }
}
