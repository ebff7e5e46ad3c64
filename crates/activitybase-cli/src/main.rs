mod banner;

use std::path::PathBuf;
use std::sync::Arc;

use activitybase_config::{AppConfig, ConfigLoader};
use activitybase_db::{MigrationList, MigrationRunner, Store, builtin_migrations};
use activitybase_gateway::GatewayServer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "activitybase", version, about = "Activities backend with schema migrations")]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Do not apply pending migrations on startup
        #[arg(long)]
        no_automigrate: bool,
    },
    /// Manage schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Revert the most recently applied migrations
    Down {
        #[arg(default_value_t = 1)]
        count: usize,
    },
    /// Show applied and pending migrations
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_default()?,
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let migrations = builtin_migrations().context("failed to build migration list")?;
    let store = open_store(&config)?;

    match cli.command {
        Command::Serve {
            host,
            port,
            no_automigrate,
        } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if no_automigrate {
                config.migrations.automigrate = false;
            }
            serve(config, store, migrations).await
        }
        Command::Migrate { action } => migrate(action, &store, &migrations),
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<Store>> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let store = Store::open(&config.db_path())?;
    Ok(Arc::new(store))
}

async fn serve(config: AppConfig, store: Arc<Store>, migrations: MigrationList) -> Result<()> {
    let admin_dir = config
        .admin
        .dir
        .clone()
        .unwrap_or_else(activitybase_config::admin_dir_from_env);
    let status = MigrationRunner::new(&store, &migrations).status()?;
    banner::print_banner(&config, &admin_dir, &status);

    GatewayServer::new(config, store, migrations).run().await?;
    info!("shutdown complete");
    Ok(())
}

fn migrate(action: MigrateAction, store: &Store, migrations: &MigrationList) -> Result<()> {
    let runner = MigrationRunner::new(store, migrations);
    match action {
        MigrateAction::Up => {
            let applied = runner.up()?;
            if applied.is_empty() {
                println!("No new migrations to apply.");
            }
            for name in applied {
                println!("Applied {name}");
            }
        }
        MigrateAction::Down { count } => {
            let reverted = runner.down(count)?;
            if reverted.is_empty() {
                println!("No migrations to revert.");
            }
            for name in reverted {
                println!("Reverted {name}");
            }
        }
        MigrateAction::Status => {
            for status in runner.status()? {
                let applied = status
                    .applied
                    .and_then(chrono::DateTime::from_timestamp_micros)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "pending".to_string());
                println!("{:<40} {applied}", status.name);
            }
        }
    }
    Ok(())
}
