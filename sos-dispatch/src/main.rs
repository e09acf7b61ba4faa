use anyhow::Context;
use sos_dispatch::config::EngineConfig;
use sos_dispatch::services::ServiceContainer;
use sos_dispatch::{database, logging};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env();
    config.validate()?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::from_config(pool, &config).await?;
    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start().await?;

    // Escalations are consumed outside the engine; log them here.
    let mut escalations = container.subscribe_escalation_events();
    let token = container.cancellation_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = escalations.recv() => match received {
                    Ok(event) => warn!(
                        emergency_id = %event.emergency_id,
                        reason = %event.reason,
                        "Emergency escalated"
                    ),
                    Err(RecvError::Lagged(n)) => warn!("Escalation log lagged by {} events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    info!(
        escalation_timeout_min = config.escalation_timeout_min,
        countdown_seconds = config.countdown_seconds,
        "sos-dispatch started"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutdown signal received");
    container.shutdown().await?;
    Ok(())
}
