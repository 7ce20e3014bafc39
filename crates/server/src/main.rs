mod bootstrap;
mod health;
mod host;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nearbux_core::config::{AppConfig, LoadOptions};
use nearbux_db::SqlFlowSnapshotRepository;

const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use nearbux_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging depends on the loaded config, so load it first.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let snapshots = Arc::new(SqlFlowSnapshotRepository::new(app.db_pool.clone()));
    let flow_host = host::FlowHost::new(app.runtime, snapshots, app.config.flow.session_idle());
    let sweep_period = app.config.flow.session_idle().min(MAX_SWEEP_PERIOD);
    let sweeper = tokio::spawn(flow_host.clone().sweep_every(sweep_period));
    let router = host::router(flow_host).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "nearbux flow host listening"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "nearbux flow host stopping"
    );
    sweeper.abort();
    tokio::time::timeout(grace, app.db_pool.close()).await.ok();

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
