//! sitbot - persistent IRC bot with pattern-dispatched commands and a bouncer.

use sitbot::Gang;
use sitbot::config::{self, Config};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sitbot.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid config");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {config_path}",
            errors.len()
        ));
    }

    info!(
        bots = config.bots.len(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting sitbot"
    );

    let gang = Arc::new(Gang::new(config.sandbox, config.bouncer));
    for profile in config.bots {
        let id = profile.id.clone();
        match gang.post(profile).await {
            Ok(session) => info!(id = %id, nick = %session.nick(), "Bot online"),
            Err(e) => warn!(id = %id, error = %e, code = e.error_code(), "Bot failed to start"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    gang.close().await;

    Ok(())
}
