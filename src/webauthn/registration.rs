//! # Credential Registration
//!
//! Binds a new authenticator to an existing identity in two steps.
//!
//! ## Registration Flow
//! 1. **Begin**: load the identity's credentials as an exclusion list, issue
//!    a challenge, park the verifier state in a challenge session
//! 2. **Finish**: consume the session, verify the attestation, store the new
//!    credential
//!
//! The session is gone after finish whatever the outcome, so a failed
//! registration always restarts from a fresh challenge.

use super::engine::{generate_challenge, prepare_error, CeremonyEngine};
use super::types::RegistrationChallenge;
use super::verifier::{CeremonyVerifier, VerifierError};
use crate::db::models::{CeremonyKind, Credential, SessionToken};
use crate::error::{CeremonyError, CeremonyResult, StoreError};
use uuid::Uuid;

impl<V: CeremonyVerifier> CeremonyEngine<V> {
    /// Start registering a credential for `identity_id`
    ///
    /// ## Errors
    /// - `IdentityNotFound`: no such identity
    /// - `Unavailable`: a store or the verifier failed
    pub async fn begin_registration(&self, identity_id: Uuid) -> CeremonyResult<RegistrationChallenge> {
        let identity = self.load_identity(identity_id).await?;

        // Authenticators already bound to this identity must not register twice
        let exclusions = self
            .credentials
            .find_by_identity(identity.id)
            .await
            .map_err(CeremonyError::Unavailable)?;

        let prepared = self
            .verifier
            .prepare_registration(&identity, &generate_challenge(), &exclusions)
            .map_err(prepare_error)?;

        let session_token = self
            .sessions
            .create(
                CeremonyKind::Registration,
                Some(identity.id),
                prepared.challenge,
                prepared.state,
                self.session_ttl,
            )
            .await
            .map_err(CeremonyError::Unavailable)?;

        tracing::info!(
            identity_id = %identity.id,
            excluded = exclusions.len(),
            "Registration ceremony started"
        );

        Ok(RegistrationChallenge {
            session_token,
            parameters: prepared.parameters,
        })
    }

    /// Complete registration with the authenticator's attestation
    ///
    /// ## Errors
    /// - `SessionNotFound` / `SessionExpired`: token unknown, used, or timed out
    /// - `CeremonyMismatch`: token belongs to an authentication ceremony or to
    ///   another identity
    /// - `AttestationInvalid`: the verifier rejected the attestation
    /// - `Conflict`: the credential id is already registered, to this identity
    ///   or any other
    pub async fn finish_registration(
        &self,
        identity_id: Uuid,
        session_token: &SessionToken,
        attestation: &V::Attestation,
    ) -> CeremonyResult<()> {
        let session = self.sessions.consume(session_token).await?;

        if session.kind != CeremonyKind::Registration {
            return Err(CeremonyError::CeremonyMismatch(format!(
                "session belongs to {} ceremony",
                session.kind
            )));
        }
        if let Some(bound) = session.identity_id {
            if bound != identity_id {
                tracing::warn!(
                    session_identity = %bound,
                    supplied_identity = %identity_id,
                    "Registration finished for a different identity than it was started for"
                );
                return Err(CeremonyError::CeremonyMismatch(
                    "session was started for another identity".to_string(),
                ));
            }
        }

        let identity = self.load_identity(identity_id).await?;

        let registered = match self.verifier.verify_registration(
            &session.ceremony_state,
            &session.challenge,
            attestation,
        ) {
            Ok(registered) => registered,
            Err(VerifierError::CredentialExcluded(credential_id)) => {
                tracing::warn!(
                    identity_id = %identity.id,
                    credential_id = %credential_id,
                    "Rejected re-registration of a known credential"
                );
                return Err(CeremonyError::Conflict);
            }
            Err(e) => {
                tracing::info!(identity_id = %identity.id, "Attestation rejected: {}", e);
                return Err(CeremonyError::AttestationInvalid(e));
            }
        };

        let credential = Credential::new(
            registered.credential_id,
            identity.id,
            registered.public_key,
            registered.counter,
        );

        match self.credentials.insert(&credential).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(
                    identity_id = %identity.id,
                    credential_id = %credential.display_id(),
                    "Rejected re-registration of a known credential"
                );
                return Err(CeremonyError::Conflict);
            }
            Err(e) => return Err(CeremonyError::Unavailable(e)),
        }

        tracing::info!(
            identity_id = %identity.id,
            credential_id = %credential.display_id(),
            counter = credential.counter,
            "Credential registered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::db::memory::{
        InMemoryChallengeSessionStore, InMemoryCredentialStore, InMemoryIdentityStore,
    };
    use crate::db::CredentialStore;
    use crate::error::CeremonyError;
    use crate::webauthn::verifier::{DeviceAttestation, DeviceKeyVerifier};
    use crate::webauthn::CeremonyEngine;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::sync::Arc;
    use uuid::Uuid;

    fn engine() -> (CeremonyEngine<DeviceKeyVerifier>, Arc<InMemoryCredentialStore>) {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let engine = CeremonyEngine::new(
            DeviceKeyVerifier::new("example.com", "Gift Planner"),
            Arc::new(InMemoryIdentityStore::new()),
            credentials.clone(),
            Arc::new(InMemoryChallengeSessionStore::new(Arc::new(ManualClock::default()))),
        );
        (engine, credentials)
    }

    #[tokio::test]
    async fn unknown_identity_cannot_begin() {
        let (engine, _) = engine();
        let result = engine.begin_registration(Uuid::new_v4()).await;
        assert!(matches!(result, Err(CeremonyError::IdentityNotFound)));
    }

    #[tokio::test]
    async fn session_for_one_identity_cannot_finish_for_another() {
        let (engine, credentials) = engine();
        let alice = engine.identities().create("Alice", "alice@example.com").await.unwrap();
        let bob = engine.identities().create("Bob", "bob@example.com").await.unwrap();
        let key = SigningKey::generate(&mut OsRng);

        let began = engine.begin_registration(alice.id).await.unwrap();
        let attestation = DeviceAttestation::sign(&key, &began.parameters, vec![1; 16], 0).unwrap();

        let result = engine
            .finish_registration(bob.id, &began.session_token, &attestation)
            .await;
        assert!(matches!(result, Err(CeremonyError::CeremonyMismatch(_))));
        assert!(credentials.is_empty());

        // The attempt consumed the session
        let retry = engine
            .finish_registration(alice.id, &began.session_token, &attestation)
            .await;
        assert!(matches!(retry, Err(CeremonyError::SessionNotFound)));
    }

    #[tokio::test]
    async fn bad_signature_is_attestation_invalid() {
        let (engine, credentials) = engine();
        let alice = engine.identities().create("Alice", "alice@example.com").await.unwrap();
        let key = SigningKey::generate(&mut OsRng);

        let began = engine.begin_registration(alice.id).await.unwrap();
        let mut attestation = DeviceAttestation::sign(&key, &began.parameters, vec![1; 16], 0).unwrap();
        let signed: &[u8] = attestation.signature.as_ref();
        let mut signature = signed.to_vec();
        signature[0] ^= 0xff;
        attestation.signature = signature.into();

        let result = engine
            .finish_registration(alice.id, &began.session_token, &attestation)
            .await;
        assert!(matches!(result, Err(CeremonyError::AttestationInvalid(_))));
        assert!(credentials.find_by_identity(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_registering_a_known_credential_is_a_conflict() {
        let (engine, credentials) = engine();
        let alice = engine.identities().create("Alice", "alice@example.com").await.unwrap();
        let key = SigningKey::generate(&mut OsRng);

        let began = engine.begin_registration(alice.id).await.unwrap();
        let attestation = DeviceAttestation::sign(&key, &began.parameters, vec![1; 16], 3).unwrap();
        engine
            .finish_registration(alice.id, &began.session_token, &attestation)
            .await
            .unwrap();
        let first = credentials.find_by_credential_id(&[1; 16]).await.unwrap();

        let again = engine.begin_registration(alice.id).await.unwrap();
        let excluded = again.parameters.0["excludeCredentials"].as_array().unwrap();
        assert_eq!(excluded.len(), 1);

        // Same credential id, different key material and counter
        let other_key = SigningKey::generate(&mut OsRng);
        let attestation = DeviceAttestation::sign(&other_key, &again.parameters, vec![1; 16], 0).unwrap();
        let result = engine
            .finish_registration(alice.id, &again.session_token, &attestation)
            .await;
        assert!(matches!(result, Err(CeremonyError::Conflict)));

        let stored = credentials.find_by_credential_id(&[1; 16]).await.unwrap();
        assert_eq!(stored, first);
        assert_eq!(stored.identity_id, alice.id);
        assert_eq!(stored.public_key, key.verifying_key().to_bytes().to_vec());
        assert_eq!(stored.counter, 3);
        assert_eq!(credentials.find_by_identity(alice.id).await.unwrap().len(), 1);
    }
}
