use std::future::Future;
use std::sync::Arc;

use activitybase_common::{Error, Result};
use activitybase_config::AppConfig;
use activitybase_db::{MigrationList, MigrationRunner, Store};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::router::build_router;
use crate::state::AppState;

/// Binds the configured address and serves the admin UI and status API.
pub struct GatewayServer {
    config: AppConfig,
    store: Arc<Store>,
    migrations: MigrationList,
}

impl GatewayServer {
    pub fn new(config: AppConfig, store: Arc<Store>, migrations: MigrationList) -> Self {
        Self {
            config,
            store,
            migrations,
        }
    }

    /// Serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_on(tokio::signal::ctrl_c())).await
    }

    /// Apply pending migrations when enabled, then serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.config.migrations.automigrate {
            let applied = MigrationRunner::new(&self.store, &self.migrations).up()?;
            info!("automigrate applied {} migration(s)", applied.len());
        }

        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);
        let state = Arc::new(AppState::new(self.config, self.store, self.migrations));
        let app = build_router(state);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Startup(format!("failed to bind {addr}: {e}")))?;
        info!("activitybase listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Startup(format!("server error: {e}")))?;

        info!("server stopped");
        Ok(())
    }
}

/// Resolve when `signal` fires. A signal that cannot be listened for never
/// fires, so the server keeps running instead of stopping at once.
async fn shutdown_on<S>(signal: S)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("failed to listen for ctrl-c, graceful shutdown disabled: {e}");
        std::future::pending::<()>().await;
    }
}
