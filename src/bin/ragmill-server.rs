//! RAG engine server
//!
//! Long-running service exposing the REST API: document ingestion,
//! chat (unary and streaming), configuration management, and provider
//! connection probes.
//!
//! Usage:
//!   ragmill-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Path to a settings file (json or toml); the
//!                      environment is used when omitted
//!   --bind <ADDR>      Listen address (default: 0.0.0.0:3001)

use ragmill::api::{start_server, AppState};
use ragmill::config::RagSettings;
use ragmill::coordinator::{ConfigurationCoordinator, SqliteConfigStore};
use ragmill::registry::InMemoryRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_OWNER: &str = "default";

struct ServerArgs {
    config_path: Option<PathBuf>,
    bind_addr: Option<String>,
}

fn parse_args() -> ServerArgs {
    let mut parsed = ServerArgs {
        config_path: None,
        bind_addr: None,
    };
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config_path = args.next().map(PathBuf::from),
            "--bind" => parsed.bind_addr = args.next(),
            "--help" | "-h" => {
                println!("Usage: ragmill-server [--config <PATH>] [--bind <ADDR>]");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = parse_args();
    let mut settings = match &args.config_path {
        Some(path) => RagSettings::from_file(path)?,
        None => RagSettings::from_env(),
    };
    if let Some(bind_addr) = args.bind_addr {
        settings.bind_addr = bind_addr;
    }

    info!("Starting ragmill v{}", ragmill::VERSION);

    let store = Arc::new(SqliteConfigStore::connect(&settings.database_url).await?);
    let registry = Arc::new(InMemoryRegistry::new());
    let coordinator = Arc::new(ConfigurationCoordinator::new(
        store,
        registry.clone(),
        DEFAULT_OWNER,
    ));

    coordinator.bootstrap(&settings).await?;

    let state = AppState {
        coordinator,
        registry,
        uploads_dir: settings.uploads_dir.clone(),
        owner: DEFAULT_OWNER.to_string(),
    };

    start_server(state, &settings.bind_addr).await
}
