//! SpaceLink tail: attaches to one space and logs everything that happens on it.
//!
//! Reads `SPACELINK_SPACE` and `SPACELINK_TOKEN` from the environment, plus
//! the usual `SPACELINK__*` configuration overrides, and runs until Ctrl-C.

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt};

use spacelink_core::config::AppConfig;
use spacelink_core::error::AppError;
use spacelink_core::result::AppResult;
use spacelink_realtime::{ConnectionManager, SessionEvent};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Tail error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> AppResult<AppConfig> {
    let env = std::env::var("SPACELINK_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

fn required_env(name: &str) -> AppResult<String> {
    std::env::var(name).map_err(|_| AppError::configuration(format!("{name} is not set")))
}

async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting spacelink-tail v{}", env!("CARGO_PKG_VERSION"));

    let space_id = required_env("SPACELINK_SPACE")?;
    let token = required_env("SPACELINK_TOKEN")?;

    let manager = ConnectionManager::websocket(config.realtime);

    let mut lifecycle = manager.subscribe_lifecycle();
    tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(event) => {
                    tracing::info!(space_id = %event.space_id, event = ?event.kind, "Lifecycle");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Lifecycle log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager
        .attach_with(space_id.as_str(), token, |session| {
            session.on_any(|event| match event {
                SessionEvent::Error(e) => tracing::warn!(error = %e, "Session error"),
                SessionEvent::Delta(change) => {
                    tracing::info!(id = %change.id, changes = %change.changes, "Delta");
                }
                other => tracing::info!(kind = %other.kind(), "Session event"),
            });
        })
        .await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for Ctrl-C: {e}")))?;

    tracing::info!("Shutting down");
    manager.detach_all();
    Ok(())
}
