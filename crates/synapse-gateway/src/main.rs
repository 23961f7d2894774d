mod adapters;
mod app;
mod http;
mod ws;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use synapse_core::config::SynapseConfig;

#[derive(Parser)]
#[command(name = "synapse-gateway", about = "LLM conversation orchestration gateway")]
struct Cli {
    /// Path to synapse.toml (default: ~/.synapse/synapse.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synapse=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SynapseConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let bind = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let state = app::AppState::build(config);
    let router = app::build_router(std::sync::Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "synapse gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
