//! # ojas-server
//!
//! Messaging and notification backend for the Ojas clinic.
//!
//! This binary provides:
//! - **REST API** (axum) for conversations, messages, notifications and
//!   appointments, authenticated with signed session tokens
//! - **WebSocket relay** that delivers messages, typing indicators and
//!   notifications to connected users in real time
//! - **Notification sweep** that pushes reminders once they become due
//! - **Admin API** for onboarding users and minting sessions

mod api;
mod appointments;
mod auth;
mod config;
mod error;
mod messaging;
mod notifications;
mod registry;
mod relay;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ojas_shared::constants::APP_NAME;
use ojas_shared::session::SessionSigner;
use ojas_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ojas_server=debug,ojas_store=info")),
        )
        .init();

    info!("Starting {APP_NAME} server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        development = config.is_development(),
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );
    error::set_expose_internal(config.is_development());

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database opened");

    let ttl = chrono::Duration::try_hours(config.session_ttl_hours)
        .ok_or_else(|| anyhow::anyhow!("SESSION_TTL_HOURS out of range"))?;
    let sessions = match &config.session_signing_key {
        Some(seed) => SessionSigner::from_seed(seed, ttl),
        None => {
            warn!("No SESSION_SIGNING_KEY set; sessions will not survive a restart");
            SessionSigner::generate(ttl)
        }
    };

    let sweep_every = config.reminder_sweep_interval;
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, sessions, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    tokio::spawn(notifications::run_sweeper(app_state.clone(), sweep_every));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
