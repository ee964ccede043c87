//! # Credential Storage
//!
//! Registered public keys and their signature counters.
//!
//! ## Counter updates
//! The stored counter never goes down. `update_counter` refuses a lower
//! value, and the ceremony engine goes through `compare_and_swap_counter`
//! so two racing authentications with the same stale counter cannot both
//! pass the clone check: only the one whose expected value still matches
//! the row wins.

use crate::db::models::{encode_credential_id, timestamp, Credential, CredentialRow};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All credentials owned by an identity; empty when there are none
    async fn find_by_identity(&self, identity_id: Uuid) -> Result<Vec<Credential>, StoreError>;

    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Credential, StoreError>;

    /// `Conflict` if the credential identifier is already registered
    async fn insert(&self, credential: &Credential) -> Result<(), StoreError>;

    /// `NotFound` if missing, `Conflict` if `new_counter` is below the stored value
    async fn update_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), StoreError>;

    /// Set the counter to `new_counter` only if it still equals `expected`.
    /// Returns `false` when the row changed underneath the caller.
    async fn compare_and_swap_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new_counter: u32,
    ) -> Result<bool, StoreError>;

    /// Replace the stored key material, e.g. a passkey whose metadata changed
    /// during an assertion. `NotFound` if missing.
    async fn update_public_key(&self, credential_id: &[u8], public_key: &[u8]) -> Result<(), StoreError>;
}

/// SQLite-backed credentials
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, credential_id: &[u8]) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE credential_id = ?)",
        )
        .bind(credential_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_by_identity(&self, identity_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE identity_id = ? ORDER BY created_at",
        )
        .bind(identity_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Credential::try_from).collect()
    }

    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Credential, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE credential_id = ?",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("credential '{}'", encode_credential_id(credential_id)))
        })?;

        row.try_into()
    }

    async fn insert(&self, credential: &Credential) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO credentials
             (credential_id, identity_id, public_key, counter, created_at, last_used_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.credential_id)
        .bind(credential.identity_id.to_string())
        .bind(&credential.public_key)
        .bind(credential.counter as i64)
        .bind(timestamp(&credential.created_at))
        .bind(credential.last_used_at.as_ref().map(timestamp))
        .execute(&self.pool)
        .await?;

        tracing::debug!(credential_id = %credential.display_id(), "Credential stored");
        Ok(())
    }

    async fn update_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE credentials
             SET counter = ?, last_used_at = ?
             WHERE credential_id = ? AND counter <= ?",
        )
        .bind(new_counter as i64)
        .bind(timestamp(&Utc::now()))
        .bind(credential_id)
        .bind(new_counter as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let display = encode_credential_id(credential_id);
        if self.exists(credential_id).await? {
            Err(StoreError::Conflict(format!(
                "counter for '{}' is already above {}",
                display, new_counter
            )))
        } else {
            Err(StoreError::NotFound(format!("credential '{}'", display)))
        }
    }

    async fn compare_and_swap_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new_counter: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE credentials
             SET counter = ?, last_used_at = ?
             WHERE credential_id = ? AND counter = ?",
        )
        .bind(new_counter as i64)
        .bind(timestamp(&Utc::now()))
        .bind(credential_id)
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        if self.exists(credential_id).await? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(format!(
                "credential '{}'",
                encode_credential_id(credential_id)
            )))
        }
    }

    async fn update_public_key(&self, credential_id: &[u8], public_key: &[u8]) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE credentials SET public_key = ? WHERE credential_id = ?")
            .bind(public_key)
            .bind(credential_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "credential '{}'",
                encode_credential_id(credential_id)
            )));
        }
        Ok(())
    }
}
