use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    /// Directory holding `data.db`.
    pub data_dir: Option<PathBuf>,
    pub migrations: MigrationsConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Migration units are compiled in; only the startup behavior is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Apply pending migrations every time the server starts.
    pub automigrate: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self { automigrate: true }
    }
}

/// Static admin UI settings. `dir` is resolved from `POCKETBASE_DIR` when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("pb_data"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("data.db")
    }
}
