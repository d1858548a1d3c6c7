//! Process entrypoint.
//!
//! Loads configuration, initialises structured logging, constructs the
//! gateway composite and runs it until SIGINT, then exits.
//! `anyhow::Context` annotates errors at the process boundary;
//! `tracing-subscriber` is driven by `RUST_LOG`.

use anyhow::Context;
use estream_industrial_gateway::config::GatewayConfig;
use estream_industrial_gateway::gateway::Gateway;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> anyhow::Result<GatewayConfig> {
    match std::env::args().nth(1) {
        Some(path) => GatewayConfig::load(&path).with_context(|| format!("loading config from {path}")),
        None => GatewayConfig::builder()
            .gateway_id(std::env::var("GATEWAY_ID").unwrap_or_else(|_| "default-gateway".into()))
            .build()
            .context("building default configuration"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config()?;
    info!(gateway_id = %config.gateway_id, name = %config.name, "starting industrial gateway");

    let gateway = Gateway::new(config).context("constructing gateway")?;

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown_cancel.cancel();
        }
    });

    gateway.run(cancel).await;
    info!("industrial gateway exited cleanly");
    Ok(())
}
