//! HTTP transport binary: loads configuration, wires a default tool
//! registry and decision provider, and serves `chatcore`'s Stage A / Stage
//! B endpoints.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chatcore::config::OrchestratorConfig;
use chatcore::decision::{ChatProvider, FakeProvider};
use chatcore::orchestrator::Orchestrator;
use chatcore::server::{router, AppState};
use chatcore::tool::builtin::{EchoTool, ScratchpadTool};
use chatcore::tool::ToolRegistry;
use clap::Parser;
use serde::Deserialize;

/// Run the chatcore HTTP transport.
#[derive(Debug, Parser)]
#[command(name = "chatcore-server", version, about)]
struct Cli {
    /// Path to a TOML config file. Layered over the built-in defaults;
    /// environment variables prefixed `CHATCORE_` layer on top of that.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// SQLite database path. Use `:memory:` for an ephemeral instance.
    #[arg(long, default_value = ":memory:")]
    db_path: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    patch: chatcore::config::ConfigPatch,
}

fn load_config(cli: &Cli) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    let mut config = OrchestratorConfig::default();

    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)?;
        let file_config: FileConfig = toml::from_str(&text)?;
        config.merge(file_config.patch);
    }

    if let Ok(model) = std::env::var("CHATCORE_MODEL") {
        config.model = model;
    }
    if let Ok(max_loops) = std::env::var("CHATCORE_TOOLS_MAX_LOOPS") {
        if let Ok(value) = max_loops.parse() {
            config.tools_max_loops = value;
        }
    }

    Ok(config)
}

fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(ScratchpadTool::default()));
    registry
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(Vec::new()));
    let orchestrator = Arc::new(Orchestrator::new(
        &cli.db_path,
        provider,
        default_registry(),
        config,
        "You are a helpful assistant.",
    )?);

    let app = router(AppState::new(orchestrator));

    tracing::info!(listen = %cli.listen, db_path = %cli.db_path, "starting chatcore-server");
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
