//! # Ceremony Engine
//!
//! Ties the stores and a verifier together. The engine keeps no state of its
//! own between calls: whatever a finish step needs was written to the
//! challenge session store by the matching begin step, so any worker can
//! serve either half of a ceremony.

use super::verifier::{CeremonyVerifier, VerifierError};
use crate::db::models::{Identity, DEFAULT_SESSION_TTL};
use crate::db::{ChallengeSessionStore, CredentialStore, IdentityStore};
use crate::error::{CeremonyError, StoreError};
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use uuid::Uuid;

/// Size of a freshly generated challenge
pub const CHALLENGE_LEN: usize = 32;

pub struct CeremonyEngine<V> {
    pub(super) verifier: V,
    pub(super) identities: Arc<dyn IdentityStore>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) sessions: Arc<dyn ChallengeSessionStore>,
    pub(super) session_ttl: Duration,
}

impl<V: CeremonyVerifier> CeremonyEngine<V> {
    pub fn new(
        verifier: V,
        identities: Arc<dyn IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn ChallengeSessionStore>,
    ) -> Self {
        Self {
            verifier,
            identities,
            credentials,
            sessions,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Override the default five minute session lifetime
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn sessions(&self) -> &Arc<dyn ChallengeSessionStore> {
        &self.sessions
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub(super) async fn load_identity(&self, id: Uuid) -> Result<Identity, CeremonyError> {
        self.identities.find_by_id(id).await.map_err(identity_lookup_error)
    }
}

impl<V> std::fmt::Debug for CeremonyEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyEngine")
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

/// Fresh random challenge from the OS CSPRNG
pub fn generate_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

pub(super) fn identity_lookup_error(e: StoreError) -> CeremonyError {
    match e {
        StoreError::NotFound(_) => CeremonyError::IdentityNotFound,
        other => CeremonyError::Unavailable(other),
    }
}

/// Verifier failed while building ceremony parameters, before anything
/// was signed
pub(super) fn prepare_error(e: VerifierError) -> CeremonyError {
    tracing::error!("Verifier could not prepare ceremony: {}", e);
    CeremonyError::Unavailable(StoreError::Unavailable(format!("verifier: {}", e)))
}
