// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Router Configuration Types
//
// Defines the configuration schema for ARGUS event-router nodes, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Routing limits and the malformed-condition policy
// - Observation (delivery queue, breaker, default rate limit) settings
// - Event log retention and checkpoint storage locations
// - Network and observability settings

use crate::domain::condition::ConditionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Kubernetes-style router configuration manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "RouterConfig")
    pub kind: String,

    /// Node metadata (name, labels, version)
    pub metadata: ManifestMetadata,

    /// Router configuration specification
    pub spec: RouterConfig,
}

/// Manifest metadata (Kubernetes-style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Router configuration (content under spec:).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub observation: ObservationConfig,

    #[serde(default)]
    pub event_log: EventLogConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum derivation depth for a single originating event. Chains past
    /// this bound are dropped.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,

    /// Verdict applied when a condition cannot be parsed.
    #[serde(default)]
    pub condition_policy: ConditionPolicy,

    /// Declarative RoutingRules manifest loaded at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            condition_policy: ConditionPolicy::default(),
            rules_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Bounded per-subscription delivery queue; oldest entry dropped on
    /// overflow.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-attempt delivery timeout. A timeout counts as a breaker failure.
    #[serde(default = "default_delivery_timeout", with = "humantime_serde")]
    pub delivery_timeout: Duration,

    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Rate limit applied to subscriptions that do not set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rate_limit: Option<crate::domain::subscription::RateLimit>,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            delivery_timeout: default_delivery_timeout(),
            breaker: BreakerConfig::default(),
            default_rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cool_down", with = "humantime_serde")]
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down: default_cool_down(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// In-memory retention; oldest entries evicted past this bound.
    #[serde(default = "default_log_entries")]
    pub max_entries: usize,

    /// Optional JSONL sink appending every dispatched event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_entries: default_log_entries(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one JSON document per checkpoint.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus exporter port; unset disables the exporter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_max_hops() -> u32 {
    8
}

fn default_queue_capacity() -> usize {
    256
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cool_down() -> Duration {
    Duration::from_secs(30)
}

fn default_log_entries() -> usize {
    10_000
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("/var/lib/argus/checkpoints")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7700
}

impl RouterConfigManifest {
    /// Loads configuration from an explicit path, `$ARGUS_CONFIG_PATH`, or
    /// `~/.argus/config.yaml`, falling back to built-in defaults when no
    /// file is found.
    pub fn discover(explicit: Option<&Path>) -> Result<RouterConfig, ConfigError> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ARGUS_CONFIG_PATH").map(PathBuf::from))
            .or_else(|| {
                std::env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".argus").join("config.yaml"))
                    .filter(|path| path.exists())
            });

        let Some(path) = candidate else {
            return Ok(RouterConfig::default());
        };

        let manifest = Self::load(&path)?;
        manifest.validate()?;
        Ok(manifest.spec)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != "100monkeys.ai/v1" {
            return Err(ConfigError::Invalid(format!(
                "unsupported apiVersion '{}'",
                self.api_version
            )));
        }
        if self.kind != "RouterConfig" {
            return Err(ConfigError::Invalid(format!(
                "unsupported kind '{}' (expected RouterConfig)",
                self.kind
            )));
        }
        if self.spec.routing.max_hops == 0 {
            return Err(ConfigError::Invalid("routing.max_hops must be positive".into()));
        }
        if self.spec.observation.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "observation.queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.routing.max_hops, 8);
        assert_eq!(config.routing.condition_policy, ConditionPolicy::FailOpen);
        assert_eq!(config.observation.queue_capacity, 256);
        assert_eq!(config.observation.breaker.failure_threshold, 5);
        assert_eq!(config.network.port, 7700);
    }

    #[test]
    fn test_manifest_parse_and_validate() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: RouterConfig
metadata:
  name: router-1
spec:
  routing:
    max_hops: 4
    condition_policy: fail_closed
  observation:
    queue_capacity: 64
    delivery_timeout: 2s
    breaker:
      failure_threshold: 3
      cool_down: 10s
    default_rate_limit:
      max_events: 100
      window_seconds: 60
  event_log:
    max_entries: 500
  network:
    port: 7900
"#;
        let manifest: RouterConfigManifest = serde_yaml::from_str(yaml).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.spec.routing.max_hops, 4);
        assert_eq!(
            manifest.spec.routing.condition_policy,
            ConditionPolicy::FailClosed
        );
        assert_eq!(
            manifest.spec.observation.delivery_timeout,
            Duration::from_secs(2)
        );
        assert_eq!(manifest.spec.observation.breaker.failure_threshold, 3);
        assert_eq!(manifest.spec.network.port, 7900);
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: NodeConfig
metadata:
  name: router-1
spec: {}
"#;
        let manifest: RouterConfigManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_err());
    }
}
