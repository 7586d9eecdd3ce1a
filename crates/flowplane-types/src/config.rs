//! Global configuration shape parsed from `config.toml`.

use serde::{Deserialize, Serialize};

/// Engine-wide configuration with serde defaults, so a partial (or missing)
/// `config.toml` still yields a usable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Address the REST API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared token required on `/internal/*` routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    /// Run-processing workers in the claim loop.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Run claim lease duration in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Default timeout for an unresolved remote dispatch.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Default approval timeout when the node policy gives none.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Interval between sweeper passes (approval expiry, dispatch timeout).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:7420".to_string()
}

fn default_worker_count() -> usize {
    2
}

fn default_lease_secs() -> u64 {
    60
}

fn default_dispatch_timeout_secs() -> u64 {
    300
}

fn default_approval_timeout_secs() -> u64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            service_token: None,
            worker_count: default_worker_count(),
            lease_secs: default_lease_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            approval_timeout_secs: default_approval_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}
