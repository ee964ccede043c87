//! # Models
//!
//! Domain types shared by the stores and the ceremony engine, plus the row
//! structs the SQLite backend maps query results into.
//!
//! SQLite keeps UUIDs and timestamps as text. Timestamps are written in a
//! fixed-width RFC3339 form (UTC, microseconds) so that comparing them as
//! strings in SQL orders them correctly; the reaper relies on that.

use crate::error::StoreError;
use base64::prelude::*;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default lifetime of a challenge session
pub const DEFAULT_SESSION_TTL: Duration = Duration::minutes(5);

/// Random bytes behind a session token (256 bits)
const SESSION_TOKEN_BYTES: usize = 32;

/// A user that can own credentials
///
/// `contact_address` is always stored normalized (see
/// [`normalize_contact_address`](crate::db::identities::normalize_contact_address)),
/// and is unique ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub contact_address: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(display_name: String, contact_address: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name,
            contact_address,
            created_at: Utc::now(),
        }
    }

    /// Canonical user handle bytes handed to authenticators
    pub fn user_handle(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }
}

/// A registered public key bound to one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Authenticator-chosen identifier, immutable once stored
    pub credential_id: Vec<u8>,
    pub identity_id: Uuid,
    /// Opaque to the stores; interpreted only by the verifier that produced it
    pub public_key: Vec<u8>,
    /// Last accepted signature counter
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(credential_id: Vec<u8>, identity_id: Uuid, public_key: Vec<u8>, counter: u32) -> Self {
        Self {
            credential_id,
            identity_id,
            public_key,
            counter,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// base64url form of the identifier, for logs and JSON
    pub fn display_id(&self) -> String {
        encode_credential_id(&self.credential_id)
    }
}

pub fn encode_credential_id(credential_id: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(credential_id)
}

/// Which ceremony a challenge session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CeremonyKind::Registration => "registration",
            CeremonyKind::Authentication => "authentication",
        }
    }
}

impl fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CeremonyKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(CeremonyKind::Registration),
            "authentication" => Ok(CeremonyKind::Authentication),
            other => Err(StoreError::Corrupt(format!("unknown ceremony kind '{}'", other))),
        }
    }
}

/// Opaque handle correlating a ceremony's begin and finish calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Fresh token from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One in-flight ceremony
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    pub token: SessionToken,
    pub kind: CeremonyKind,
    /// Identity the ceremony was started for, when known at begin time
    pub identity_id: Option<Uuid>,
    pub challenge: Vec<u8>,
    /// Verifier state, opaque to the store
    pub ceremony_state: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ChallengeSession {
    pub fn new(
        kind: CeremonyKind,
        identity_id: Option<Uuid>,
        challenge: Vec<u8>,
        ceremony_state: Vec<u8>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token: SessionToken::generate(),
            kind,
            identity_id,
            challenge,
            ceremony_state,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Invalid once wall-clock time exceeds the expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// SQLite rows

pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("invalid timestamp '{}'", s)))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|_| StoreError::Corrupt(format!("invalid uuid '{}'", s)))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct IdentityRow {
    pub id: String,
    pub display_name: String,
    pub contact_address: String,
    pub created_at: String,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            id: parse_uuid(&row.id)?,
            display_name: row.display_name,
            contact_address: row.contact_address,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CredentialRow {
    pub credential_id: Vec<u8>,
    pub identity_id: String,
    pub public_key: Vec<u8>,
    pub counter: i64,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let counter = u32::try_from(row.counter)
            .map_err(|_| StoreError::Corrupt(format!("counter out of range: {}", row.counter)))?;

        Ok(Credential {
            credential_id: row.credential_id,
            identity_id: parse_uuid(&row.identity_id)?,
            public_key: row.public_key,
            counter,
            created_at: parse_timestamp(&row.created_at)?,
            last_used_at: row.last_used_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChallengeSessionRow {
    pub token: String,
    pub kind: String,
    pub identity_id: Option<String>,
    pub challenge: Vec<u8>,
    pub ceremony_state: Vec<u8>,
    pub created_at: String,
    pub expires_at: String,
}

impl TryFrom<ChallengeSessionRow> for ChallengeSession {
    type Error = StoreError;

    fn try_from(row: ChallengeSessionRow) -> Result<Self, Self::Error> {
        Ok(ChallengeSession {
            token: SessionToken(row.token),
            kind: row.kind.parse()?,
            identity_id: row.identity_id.as_deref().map(parse_uuid).transpose()?,
            challenge: row.challenge,
            ceremony_state: row.ceremony_state,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_unique_and_long() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        // 32 bytes base64url without padding
        assert_eq!(a.as_str().len(), 43);
    }

    #[test]
    fn session_expires_strictly_after_ttl() {
        let now = Utc::now();
        let session = ChallengeSession::new(
            CeremonyKind::Registration,
            None,
            vec![1; 32],
            Vec::new(),
            now,
            DEFAULT_SESSION_TTL,
        );
        assert!(!session.is_expired(now + DEFAULT_SESSION_TTL));
        assert!(session.is_expired(now + DEFAULT_SESSION_TTL + Duration::seconds(1)));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        use chrono::SubsecRound;

        let early = Utc::now().trunc_subsecs(6);
        let late = early + Duration::milliseconds(1500);
        assert!(timestamp(&early) < timestamp(&late));
        assert_eq!(parse_timestamp(&timestamp(&early)).unwrap(), early);
    }

    #[test]
    fn ceremony_kind_round_trips_through_text() {
        assert_eq!("registration".parse::<CeremonyKind>().unwrap(), CeremonyKind::Registration);
        assert!("login".parse::<CeremonyKind>().is_err());
    }
}
