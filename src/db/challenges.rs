//! # Challenge Session Storage
//!
//! A challenge session holds everything the finish step of a ceremony needs:
//! the challenge bytes, the verifier's private state, the ceremony kind and
//! the identity it was started for.
//!
//! ## Lifecycle
//! 1. `create` at ceremony start, keyed by a fresh random token
//! 2. `consume` at ceremony finish, which removes the record in the same
//!    step that reads it, whether or not it has expired
//! 3. `reap_expired` for sessions that were started and never finished
//!
//! Consuming is the only synchronization point of the ceremony core: when
//! several requests race to finish with the same token, exactly one of them
//! gets the session and the rest see `NotFound`.

use crate::clock::Clock;
use crate::db::models::{
    timestamp, CeremonyKind, ChallengeSession, ChallengeSessionRow, SessionToken,
};
use crate::error::{SessionError, StoreError};
use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait ChallengeSessionStore: Send + Sync {
    /// Store a new session and hand back its token
    async fn create(
        &self,
        kind: CeremonyKind,
        identity_id: Option<Uuid>,
        challenge: Vec<u8>,
        ceremony_state: Vec<u8>,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError>;

    /// Remove and return the session. `Expired` if it existed but timed out,
    /// `NotFound` if it never existed or was already consumed.
    async fn consume(&self, token: &SessionToken) -> Result<ChallengeSession, SessionError>;

    /// Delete every expired session, returning how many went
    async fn reap_expired(&self) -> Result<u64, StoreError>;
}

/// Shared expiry check applied to a record that has just been removed
pub(crate) fn check_consumed(
    session: ChallengeSession,
    clock: &dyn Clock,
) -> Result<ChallengeSession, SessionError> {
    if session.is_expired(clock.now()) {
        tracing::debug!(kind = %session.kind, "Challenge session expired before use");
        return Err(SessionError::Expired);
    }

    tracing::debug!(kind = %session.kind, "Challenge session consumed");
    Ok(session)
}

/// SQLite-backed challenge sessions
#[derive(Clone)]
pub struct SqliteChallengeSessionStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteChallengeSessionStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl ChallengeSessionStore for SqliteChallengeSessionStore {
    async fn create(
        &self,
        kind: CeremonyKind,
        identity_id: Option<Uuid>,
        challenge: Vec<u8>,
        ceremony_state: Vec<u8>,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError> {
        let session = ChallengeSession::new(
            kind,
            identity_id,
            challenge,
            ceremony_state,
            self.clock.now(),
            ttl,
        );

        sqlx::query(
            "INSERT INTO challenge_sessions
             (token, kind, identity_id, challenge, ceremony_state, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.token.as_str())
        .bind(session.kind.as_str())
        .bind(session.identity_id.map(|id| id.to_string()))
        .bind(&session.challenge)
        .bind(&session.ceremony_state)
        .bind(timestamp(&session.created_at))
        .bind(timestamp(&session.expires_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!(kind = %kind, expires_at = %session.expires_at, "Challenge session created");
        Ok(session.token)
    }

    async fn consume(&self, token: &SessionToken) -> Result<ChallengeSession, SessionError> {
        // One statement, so concurrent callers cannot both read the row
        let row = sqlx::query_as::<_, ChallengeSessionRow>(
            "DELETE FROM challenge_sessions WHERE token = ?
             RETURNING token, kind, identity_id, challenge, ceremony_state, created_at, expires_at",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(SessionError::NotFound)?;

        check_consumed(row.try_into()?, self.clock.as_ref())
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let now = timestamp(&self.clock.now());

        let result = sqlx::query("DELETE FROM challenge_sessions WHERE expires_at < ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
