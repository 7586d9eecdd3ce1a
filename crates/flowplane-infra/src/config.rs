//! Global configuration loading.
//!
//! `{data_dir}/config.toml` is optional; a missing or malformed file falls
//! back to defaults with a warning so a bad edit never keeps the control
//! plane from starting.

use std::path::{Path, PathBuf};

use tracing::warn;

use flowplane_types::config::GlobalConfig;

/// Data directory from `FLOWPLANE_DATA_DIR`, defaulting to `~/.flowplane`.
pub fn data_dir() -> PathBuf {
    match std::env::var("FLOWPLANE_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowplane"),
    }
}

/// Load `config.toml` from the data directory.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let path = data_dir.join("config.toml");
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => match toml::from_str::<GlobalConfig>(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid config.toml, using defaults");
                GlobalConfig::default()
            }
        },
        Err(_) => GlobalConfig::default(),
    }
}
