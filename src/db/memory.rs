//! In-memory stores
//!
//! `DashMap`-backed implementations of the three store traits. Nothing
//! survives a restart, which is fine for tests and for local development
//! without a database file.

use crate::clock::Clock;
use crate::db::challenges::{check_consumed, ChallengeSessionStore};
use crate::db::credentials::CredentialStore;
use crate::db::identities::{normalize_contact_address, IdentityStore};
use crate::db::models::{
    encode_credential_id, CeremonyKind, ChallengeSession, Credential, Identity, SessionToken,
};
use crate::error::{SessionError, StoreError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    by_id: DashMap<Uuid, Identity>,
    by_address: DashMap<String, Uuid>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn create(&self, display_name: &str, contact_address: &str) -> Result<Identity, StoreError> {
        let identity = Identity::new(
            display_name.trim().to_string(),
            normalize_contact_address(contact_address),
        );

        // The address entry stays locked until the identity is in place
        match self.by_address.entry(identity.contact_address.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "contact address '{}' already registered",
                identity.contact_address
            ))),
            Entry::Vacant(slot) => {
                self.by_id.insert(identity.id, identity.clone());
                slot.insert(identity.id);
                Ok(identity)
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Identity, StoreError> {
        self.by_id
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("identity '{}'", id)))
    }

    async fn find_by_contact_address(&self, contact_address: &str) -> Result<Identity, StoreError> {
        let normalized = normalize_contact_address(contact_address);
        let id = self
            .by_address
            .get(&normalized)
            .map(|entry| *entry.value())
            .ok_or_else(|| StoreError::NotFound(format!("identity with address '{}'", normalized)))?;

        self.find_by_id(id).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: DashMap<Vec<u8>, Credential>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

fn credential_not_found(credential_id: &[u8]) -> StoreError {
    StoreError::NotFound(format!("credential '{}'", encode_credential_id(credential_id)))
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_identity(&self, identity_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        let mut owned: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|entry| entry.identity_id == identity_id)
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by_key(|c| c.created_at);
        Ok(owned)
    }

    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Credential, StoreError> {
        self.credentials
            .get(credential_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| credential_not_found(credential_id))
    }

    async fn insert(&self, credential: &Credential) -> Result<(), StoreError> {
        match self.credentials.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "credential '{}' already registered",
                credential.display_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(())
            }
        }
    }

    async fn update_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), StoreError> {
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| credential_not_found(credential_id))?;

        if new_counter < entry.counter {
            return Err(StoreError::Conflict(format!(
                "counter for '{}' is already above {}",
                entry.display_id(),
                new_counter
            )));
        }

        entry.counter = new_counter;
        entry.last_used_at = Some(Utc::now());
        Ok(())
    }

    async fn compare_and_swap_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new_counter: u32,
    ) -> Result<bool, StoreError> {
        // get_mut holds the shard write lock for the whole check-and-set
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| credential_not_found(credential_id))?;

        if entry.counter != expected {
            return Ok(false);
        }

        entry.counter = new_counter;
        entry.last_used_at = Some(Utc::now());
        Ok(true)
    }

    async fn update_public_key(&self, credential_id: &[u8], public_key: &[u8]) -> Result<(), StoreError> {
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| credential_not_found(credential_id))?;

        entry.public_key = public_key.to_vec();
        Ok(())
    }
}

pub struct InMemoryChallengeSessionStore {
    sessions: DashMap<SessionToken, ChallengeSession>,
    clock: Arc<dyn Clock>,
}

impl InMemoryChallengeSessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Number of sessions still held, expired or not
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for InMemoryChallengeSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChallengeSessionStore")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[async_trait]
impl ChallengeSessionStore for InMemoryChallengeSessionStore {
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
        let token = session.token.clone();

        match self.sessions.entry(token.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("session token collision".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                tracing::debug!(kind = %kind, "Challenge session created");
                Ok(token)
            }
        }
    }

    async fn consume(&self, token: &SessionToken) -> Result<ChallengeSession, SessionError> {
        let (_, session) = self.sessions.remove(token).ok_or(SessionError::NotFound)?;
        check_consumed(session, self.clock.as_ref())
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}
