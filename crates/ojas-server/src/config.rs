//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ojas_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_SESSION_TTL_HOURS, MAX_SESSION_TTL_HOURS};

/// Deployment mode. Development exposes internal error detail in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and relay.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory, `ojas.db`).
    pub database_path: Option<PathBuf>,

    /// Ed25519 seed used to sign session tokens (hex-encoded, 64 chars).
    /// Env: `SESSION_SIGNING_KEY`
    /// Default: `None` (random key per process; tokens do not survive restarts).
    pub session_signing_key: Option<[u8; 32]>,

    /// Session token lifetime.
    /// Env: `SESSION_TTL_HOURS`
    /// Default: 168
    pub session_ttl_hours: i64,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Env: `OJAS_ENV` (`development` | `production`)
    /// Default: development
    pub environment: Environment,

    /// How often due notifications are swept and pushed.
    /// Env: `REMINDER_SWEEP_SECS`
    /// Default: 30
    pub reminder_sweep_interval: Duration,

    /// Human-readable name for this clinic instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Ojas Clinic"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            session_signing_key: None,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            admin_token: None,
            environment: Environment::Development,
            reminder_sweep_interval: Duration::from_secs(30),
            instance_name: "Ojas Clinic".to_string(),
        }
    }
}

// Secrets stay out of the startup log line.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("session_signing_key", &self.session_signing_key.map(|_| "<set>"))
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<set>"))
            .field("environment", &self.environment)
            .field("reminder_sweep_interval", &self.reminder_sweep_interval)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(hex_key) = var("SESSION_SIGNING_KEY") {
            match parse_hex_32(&hex_key) {
                Ok(key) => config.session_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_SIGNING_KEY, using an ephemeral key"
                    );
                }
            }
        }

        if let Some(val) = var("SESSION_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(hours) if (1..=MAX_SESSION_TTL_HOURS).contains(&hours) => {
                    config.session_ttl_hours = hours
                }
                _ => tracing::warn!(value = %val, "Invalid SESSION_TTL_HOURS, using default"),
            }
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = var("OJAS_ENV") {
            match Environment::parse(&val) {
                Some(env) => config.environment = env,
                None => tracing::warn!(value = %val, "Invalid OJAS_ENV, using development"),
            }
        }

        if let Some(val) = var("REMINDER_SWEEP_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.reminder_sweep_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid REMINDER_SWEEP_SECS, using default"),
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        config
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_32(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }
    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
