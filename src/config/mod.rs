pub mod schema;

pub use schema::{AuthConfig, Config, GatewayConfig, MediaConfig, StorageConfig};

use std::path::PathBuf;

/// Default config file location: `<platform config dir>/vidgate/config.toml`,
/// falling back to `./config.toml` when no home directory can be resolved.
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "vidgate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
