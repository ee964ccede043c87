//! # Configuration Management
//!
//! Configuration comes from the environment, with a `.env` file honoured for
//! local development.
//!
//! ## Environment Variables
//! - `HOST`: Server bind address (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_URL`: SQLite database connection string
//! - `RP_ID`: WebAuthn Relying Party ID (usually your domain)
//! - `RP_ORIGIN`: WebAuthn Relying Party Origin (full URL)
//! - `RP_NAME`: Human-readable name shown by authenticators
//! - `CEREMONY_TTL_SECS`: Lifetime of a challenge session (default: 300)
//! - `SESSION_REAP_INTERVAL_SECS`: How often expired sessions are purged (default: 600)
//! - `GENERIC_AUTH_ERRORS`: Report unknown identities and bad assertions
//!   with one generic 401 (default: false)

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP (Relying Party)**: the service that relies on the authentication
/// - **RP ID**: its domain name (e.g., "example.com" or "localhost")
/// - **RP Origin**: its full URL (e.g., "https://example.com")
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Format: "sqlite:filename.db?mode=rwc" (read, write, create)
    pub database_url: String,

    /// Must match the domain the app is served from, without scheme or port
    pub rp_id: String,

    /// Full URL including scheme, e.g. "http://localhost:8080"
    pub rp_origin: String,

    pub rp_name: String,

    /// Seconds a begun ceremony stays finishable
    pub ceremony_ttl_secs: i64,

    /// Seconds between background purges of expired challenge sessions
    pub reap_interval_secs: u64,

    /// Collapse account-revealing errors into "invalid credentials"
    pub generic_auth_errors: bool,
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Missing variables fall back to defaults; present but unparsable ones
    /// are an error.
    ///
    /// ## Example .env file
    /// ```text
    /// HOST=127.0.0.1
    /// PORT=8080
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:8080
    /// RP_NAME=Gift Planner
    /// CEREMONY_TTL_SECS=300
    /// ```
    pub fn from_env() -> Result<Self> {
        // Missing .env is fine
        dotenvy::dotenv().ok();

        let config = Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: var_or("PORT", 8080)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:passkey.db?mode=rwc".to_string()),
            rp_id: env::var("RP_ID").unwrap_or_else(|_| "localhost".to_string()),
            rp_origin: env::var("RP_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            rp_name: env::var("RP_NAME").unwrap_or_else(|_| "Gift Planner".to_string()),
            ceremony_ttl_secs: var_or("CEREMONY_TTL_SECS", 300)?,
            reap_interval_secs: var_or("SESSION_REAP_INTERVAL_SECS", 600)?,
            generic_auth_errors: var_or("GENERIC_AUTH_ERRORS", false)?,
        };

        if !(1..=86_400).contains(&config.ceremony_ttl_secs) {
            bail!("CEREMONY_TTL_SECS must be between 1 and 86400");
        }
        if config.reap_interval_secs == 0 {
            bail!("SESSION_REAP_INTERVAL_SECS must be positive");
        }

        Ok(config)
    }

    /// Socket address for `tokio::net::TcpListener::bind()`, e.g. "127.0.0.1:8080"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ceremony_ttl_secs)
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reap_interval_secs)
    }
}
