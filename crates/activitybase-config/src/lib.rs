pub mod loader;
pub mod model;

pub use loader::{ADMIN_DIR_ENV, ConfigLoader, DATA_DIR_ENV, admin_dir_for, admin_dir_from_env};
pub use model::{AdminConfig, AppConfig, GatewayConfig, MigrationsConfig};
