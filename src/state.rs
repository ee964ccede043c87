//! # Application State
//!
//! Shared state handed to every request handler. The ceremony engine sits
//! behind an `Arc`, so the per-request clone axum makes is a pointer copy.

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::{self, SqliteChallengeSessionStore, SqliteCredentialStore, SqliteIdentityStore};
use crate::webauthn::{CeremonyEngine, CeremonyVerifier, PasskeyVerifier};
use anyhow::{Context, Result};
use std::sync::Arc;
use webauthn_rs::prelude::Url;

pub struct AppState<V> {
    pub engine: Arc<CeremonyEngine<V>>,

    /// See `Config::generic_auth_errors`
    pub generic_auth_errors: bool,
}

// Derive would require `V: Clone`
impl<V> Clone for AppState<V> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            generic_auth_errors: self.generic_auth_errors,
        }
    }
}

impl<V: CeremonyVerifier> AppState<V> {
    pub fn from_engine(engine: CeremonyEngine<V>, generic_auth_errors: bool) -> Self {
        Self {
            engine: Arc::new(engine),
            generic_auth_errors,
        }
    }
}

impl AppState<PasskeyVerifier> {
    /// Production state: SQLite stores and the webauthn-rs verifier
    ///
    /// # Errors
    /// - Database connection or migrations fail
    /// - The relying party origin is not a URL, or does not match the RP ID
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.database_url)
            .await
            .context("failed to open database")?;

        let rp_origin = Url::parse(&config.rp_origin).context("RP_ORIGIN is not a valid URL")?;
        let verifier = PasskeyVerifier::new(&config.rp_id, &rp_origin, &config.rp_name)
            .context("invalid relying party configuration")?;

        let engine = CeremonyEngine::new(
            verifier,
            Arc::new(SqliteIdentityStore::new(pool.clone())),
            Arc::new(SqliteCredentialStore::new(pool.clone())),
            Arc::new(SqliteChallengeSessionStore::new(pool, Arc::new(SystemClock))),
        )
        .with_session_ttl(config.session_ttl());

        Ok(Self::from_engine(engine, config.generic_auth_errors))
    }
}
