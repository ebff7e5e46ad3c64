use std::path::PathBuf;
use std::sync::Arc;

use activitybase_config::{AppConfig, admin_dir_from_env};
use activitybase_db::{MigrationList, Store};

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub migrations: MigrationList,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<Store>, migrations: MigrationList) -> Self {
        Self {
            config,
            store,
            migrations,
        }
    }

    /// Root directory served under `/admin`.
    pub fn admin_dir(&self) -> PathBuf {
        self.config
            .admin
            .dir
            .clone()
            .unwrap_or_else(admin_dir_from_env)
    }
}

pub type SharedState = Arc<AppState>;
