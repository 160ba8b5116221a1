mod bootstrap;
mod health;
pub mod routes;

use std::sync::Arc;

use anyhow::Result;
use tierflow_core::config::{AppConfig, LoadOptions};
use tierflow_engine::EscalationScheduler;

fn init_logging(config: &AppConfig) {
    use tierflow_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let scheduler = if app.config.scheduler.enabled {
        let scheduler = Arc::new(EscalationScheduler::new(
            app.service.clone(),
            app.config.scheduler.tick_secs,
            app.config.scheduler.max_auto_escalations,
        ));
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        Some((scheduler, handle))
    } else {
        tracing::info!(
            event_name = "system.scheduler.disabled",
            "escalation scheduler disabled by configuration"
        );
        None
    };

    let router = routes::router(app.service.clone()).merge(health::router(app.db_pool.clone()));
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "tierflow-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.shutdown();
        // Let an in-flight sweep finish before the runtime is torn down.
        let grace = std::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!(
                event_name = "system.scheduler.shutdown_timeout",
                grace_secs = grace.as_secs(),
                "escalation scheduler did not stop within the shutdown grace period"
            );
        }
    }
    tracing::info!(event_name = "system.server.stopping", "tierflow-server stopping");

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
