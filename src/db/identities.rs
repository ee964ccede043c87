//! # Identity Storage
//!
//! Identities are looked up by id during registration and by contact
//! address at the start of authentication. Addresses are normalized before
//! they are stored or compared, so uniqueness is case-insensitive.

use crate::db::models::{timestamp, Identity, IdentityRow};
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Trim surrounding whitespace and lower-case
pub fn normalize_contact_address(contact_address: &str) -> String {
    contact_address.trim().to_lowercase()
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create an identity; `Conflict` if the normalized address is taken
    async fn create(&self, display_name: &str, contact_address: &str) -> Result<Identity, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Identity, StoreError>;

    /// Normalizes `contact_address` before matching
    async fn find_by_contact_address(&self, contact_address: &str) -> Result<Identity, StoreError>;
}

/// SQLite-backed identities
#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn create(&self, display_name: &str, contact_address: &str) -> Result<Identity, StoreError> {
        let identity = Identity::new(
            display_name.trim().to_string(),
            normalize_contact_address(contact_address),
        );

        sqlx::query(
            "INSERT INTO identities (id, display_name, contact_address, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(identity.id.to_string())
        .bind(&identity.display_name)
        .bind(&identity.contact_address)
        .bind(timestamp(&identity.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!(
                "contact address '{}' already registered",
                identity.contact_address
            )),
            other => other,
        })?;

        tracing::debug!(identity_id = %identity.id, "Identity created");
        Ok(identity)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Identity, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity '{}'", id)))?;

        row.try_into()
    }

    async fn find_by_contact_address(&self, contact_address: &str) -> Result<Identity, StoreError> {
        let normalized = normalize_contact_address(contact_address);

        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT * FROM identities WHERE contact_address = ?",
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("identity with address '{}'", normalized)))?;

        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_trims_and_lowercases() {
        assert_eq!(normalize_contact_address("  U1@Example.COM \n"), "u1@example.com");
        assert_eq!(normalize_contact_address("plain@example.com"), "plain@example.com");
    }
}
