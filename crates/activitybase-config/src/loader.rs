use std::path::{Path, PathBuf};

use activitybase_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Base directory for static admin assets.
pub const ADMIN_DIR_ENV: &str = "POCKETBASE_DIR";
pub const DATA_DIR_ENV: &str = "ACTIVITYBASE_DATA_DIR";

const DEFAULT_CONFIG_NAMES: [&str; 3] = [
    "activitybase.yml",
    "activitybase.yaml",
    "activitybase.toml",
];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file, picking the parser from its extension, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: AppConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("loaded config from {}", path.display());
        Self::apply_env(&mut config);
        Ok(config)
    }

    /// Look for `activitybase.{yml,yaml,toml}` in `dir`; fall back to defaults.
    pub fn load_from_dir(dir: &Path) -> Result<AppConfig> {
        for name in DEFAULT_CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }

        debug!("no config file in {}, using defaults", dir.display());
        let mut config = AppConfig::default();
        Self::apply_env(&mut config);
        Ok(config)
    }

    pub fn load_default() -> Result<AppConfig> {
        Self::load_from_dir(Path::new("."))
    }

    fn apply_env(config: &mut AppConfig) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if config.admin.dir.is_none() {
            config.admin.dir = Some(admin_dir_from_env());
        }
    }
}

/// `<POCKETBASE_DIR>/pb_migrations`. An unset variable is not validated and
/// yields the relative path `pb_migrations`.
pub fn admin_dir_from_env() -> PathBuf {
    admin_dir_for(std::env::var(ADMIN_DIR_ENV).ok().as_deref())
}

/// Admin asset root below `base`; `None` and `""` both give `pb_migrations`.
pub fn admin_dir_for(base: Option<&str>) -> PathBuf {
    PathBuf::from(base.unwrap_or_default()).join("pb_migrations")
}
