//! Controller and adapter settings loaded from environment variables.

use crate::error::{Error, Result};
use std::time::Duration;

/// Controller-level configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name the controller records events and manages children under.
    pub controller_name: String,
    /// Cluster domain used to build Service addresses.
    pub cluster_domain: String,
    /// First requeue delay after a failed reconciliation (milliseconds).
    pub backoff_start_ms: u64,
    /// Maximum requeue delay after failed reconciliations (milliseconds).
    pub backoff_max_ms: u64,
    /// Period after which healthy sources are reconciled again (seconds).
    pub resync_period_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            controller_name: "knative-sources-controller".to_string(),
            cluster_domain: knative::addressable_type::DEFAULT_CLUSTER_DOMAIN.to_string(),
            backoff_start_ms: 5_000,
            backoff_max_ms: 1_000_000,
            resync_period_secs: 10 * 60 * 60,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let default = ControllerConfig::default();
        ControllerConfig {
            controller_name: env_var_or_default_str("CONTROLLER_NAME", &default.controller_name),
            cluster_domain: env_var_or_default_str("CLUSTER_DOMAIN", &default.cluster_domain),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", default.backoff_start_ms),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", default.backoff_max_ms),
            resync_period_secs: env_var_or_default("RESYNC_PERIOD_SECS", default.resync_period_secs),
        }
    }

    /// Requeue delay after `failures` consecutive failed reconciliations.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u64.saturating_pow(failures.saturating_sub(1));
        Duration::from_millis(self.backoff_start_ms.saturating_mul(factor).min(self.backoff_max_ms))
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }
}

/// Observability settings handed to receive adapters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservabilityConfig {
    pub logging: String,
    pub metrics: String,
    pub tracing: String,
}

/// Settings shared by all receive adapters of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Container image of the adapter.
    pub image: String,
    pub observability: ObservabilityConfig,
}

impl AdapterConfig {
    /// Reads `<ADAPTER>_ADAPTER_IMAGE` (required) and the `K_*_CONFIG` observability settings.
    pub fn from_env(adapter_name: &str) -> Result<Self> {
        let key = format!("{}_ADAPTER_IMAGE", adapter_name.to_uppercase());
        let image = std::env::var(&key)
            .ok()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| Error::Config(format!("required environment variable {key} is not defined")))?;

        Ok(AdapterConfig {
            image,
            observability: ObservabilityConfig {
                logging: env_var_or_default_str(ENV_LOGGING_CONFIG, ""),
                metrics: env_var_or_default_str(ENV_METRICS_CONFIG, ""),
                tracing: env_var_or_default_str(ENV_TRACING_CONFIG, ""),
            },
        })
    }
}

pub const ENV_LOGGING_CONFIG: &str = "K_LOGGING_CONFIG";
pub const ENV_METRICS_CONFIG: &str = "K_METRICS_CONFIG";
pub const ENV_TRACING_CONFIG: &str = "K_TRACING_CONFIG";

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
