//! # Database Module
//!
//! Storage for everything the ceremonies need across calls:
//! - `models`: Identity, Credential and ChallengeSession types
//! - `identities`: identity lookup by id or normalized contact address
//! - `credentials`: registered public keys and their signature counters
//! - `challenges`: short-lived challenge sessions, consumed at most once
//! - `memory`: in-memory implementations of the three stores
//!
//! Each store is a trait so the ceremony engine can run against SQLite in
//! production and against the in-memory maps in tests.

pub mod challenges;
pub mod credentials;
pub mod identities;
pub mod memory;
pub mod models;

pub use challenges::{ChallengeSessionStore, SqliteChallengeSessionStore};
pub use credentials::{CredentialStore, SqliteCredentialStore};
pub use identities::{IdentityStore, SqliteIdentityStore};

use crate::error::StoreError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Open a SQLite pool and bring the schema up to date
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let pool = SqlitePool::connect(database_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database; every connection to
/// `sqlite::memory:` would otherwise get its own empty database
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;

    tracing::debug!("Database migrations applied");
    Ok(())
}
