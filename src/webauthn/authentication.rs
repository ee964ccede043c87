//! # Authentication
//!
//! Proves control of a registered credential.
//!
//! ## Clone detection
//! Authenticators report a signature counter with every assertion. Once a
//! credential has reported a non-zero value, every later assertion must
//! report a strictly larger one; anything else means two devices share the
//! key. A stored counter of 0 means the credential has never reported one,
//! so the first assertion sets the baseline whatever it says.
//!
//! The new counter is written with a compare-and-swap on the value that was
//! checked. If another authentication moved the counter in between, this
//! one fails the same way a stale counter does.
//!
//! Some verifiers hand back updated key material with a good assertion. It is
//! written after the counter and a failure there does not undo the login.

use super::engine::{generate_challenge, identity_lookup_error, prepare_error, CeremonyEngine};
use super::types::AuthenticationChallenge;
use super::verifier::{CeremonyVerifier, VerifierError};
use crate::db::models::{encode_credential_id, CeremonyKind, Identity, SessionToken};
use crate::error::{CeremonyError, CeremonyResult};
use uuid::Uuid;

/// Whether a reported counter may replace the stored one
pub fn counter_advances(stored: u32, reported: u32) -> bool {
    stored == 0 || reported > stored
}

impl<V: CeremonyVerifier> CeremonyEngine<V> {
    /// Start authenticating whoever owns `contact_address`
    ///
    /// The address is normalized before lookup. Callers that want to resist
    /// account enumeration should render `IdentityNotFound` the same way as a
    /// failed assertion.
    ///
    /// ## Errors
    /// - `IdentityNotFound`: no identity with that address, or it has no
    ///   credentials to authenticate with
    /// - `Unavailable`: a store or the verifier failed
    pub async fn begin_authentication(
        &self,
        contact_address: &str,
    ) -> CeremonyResult<AuthenticationChallenge> {
        let identity = self
            .identities
            .find_by_contact_address(contact_address)
            .await
            .map_err(identity_lookup_error)?;

        let allowed = self
            .credentials
            .find_by_identity(identity.id)
            .await
            .map_err(CeremonyError::Unavailable)?;

        if allowed.is_empty() {
            tracing::info!(identity_id = %identity.id, "Authentication requested for identity without credentials");
            return Err(CeremonyError::IdentityNotFound);
        }

        let prepared = self
            .verifier
            .prepare_authentication(&identity, &generate_challenge(), &allowed)
            .map_err(prepare_error)?;

        let session_token = self
            .sessions
            .create(
                CeremonyKind::Authentication,
                Some(identity.id),
                prepared.challenge,
                prepared.state,
                self.session_ttl,
            )
            .await
            .map_err(CeremonyError::Unavailable)?;

        tracing::info!(
            identity_id = %identity.id,
            allowed = allowed.len(),
            "Authentication ceremony started"
        );

        Ok(AuthenticationChallenge {
            session_token,
            identity_id: identity.id,
            parameters: prepared.parameters,
        })
    }

    /// Complete authentication with the authenticator's signed assertion
    ///
    /// When the session names an identity, that identity is used and
    /// `identity_id` is ignored.
    ///
    /// ## Errors
    /// - `SessionNotFound` / `SessionExpired`: token unknown, used, or timed out
    /// - `CeremonyMismatch`: token belongs to a registration ceremony
    /// - `AttestationInvalid`: the verifier rejected the assertion
    /// - `PossibleCloneDetected`: the signature counter did not advance
    pub async fn finish_authentication(
        &self,
        identity_id: Uuid,
        session_token: &SessionToken,
        assertion: &V::Assertion,
    ) -> CeremonyResult<Identity> {
        let session = self.sessions.consume(session_token).await?;

        if session.kind != CeremonyKind::Authentication {
            return Err(CeremonyError::CeremonyMismatch(format!(
                "session belongs to {} ceremony",
                session.kind
            )));
        }

        let resolved_id = match session.identity_id {
            Some(bound) => {
                if bound != identity_id {
                    tracing::warn!(
                        session_identity = %bound,
                        supplied_identity = %identity_id,
                        "Ignoring caller-supplied identity in favour of the session's"
                    );
                }
                bound
            }
            None => identity_id,
        };

        let identity = self.load_identity(resolved_id).await?;

        let allowed = self
            .credentials
            .find_by_identity(identity.id)
            .await
            .map_err(CeremonyError::Unavailable)?;

        let verified = self
            .verifier
            .verify_authentication(&session.ceremony_state, &session.challenge, &allowed, assertion)
            .map_err(|e| {
                tracing::info!(identity_id = %identity.id, "Assertion rejected: {}", e);
                CeremonyError::AttestationInvalid(e)
            })?;

        let credential_id = encode_credential_id(&verified.credential_id);
        let credential = allowed
            .iter()
            .find(|c| c.credential_id == verified.credential_id)
            .ok_or_else(|| {
                tracing::info!(
                    identity_id = %identity.id,
                    credential_id = %credential_id,
                    "Assertion from a credential this identity does not own"
                );
                CeremonyError::AttestationInvalid(VerifierError::CredentialNotAllowed(
                    credential_id.clone(),
                ))
            })?;

        if !counter_advances(credential.counter, verified.counter) {
            tracing::error!(
                target: "security",
                identity_id = %identity.id,
                credential_id = %credential_id,
                stored = credential.counter,
                reported = verified.counter,
                "Signature counter did not advance, possible cloned authenticator"
            );
            return Err(CeremonyError::PossibleCloneDetected { credential_id });
        }

        let swapped = self
            .credentials
            .compare_and_swap_counter(&credential.credential_id, credential.counter, verified.counter)
            .await
            .map_err(CeremonyError::Unavailable)?;

        if !swapped {
            tracing::error!(
                target: "security",
                identity_id = %identity.id,
                credential_id = %credential_id,
                expected = credential.counter,
                reported = verified.counter,
                "Signature counter changed during authentication, possible replayed assertion"
            );
            return Err(CeremonyError::PossibleCloneDetected { credential_id });
        }

        if let Some(public_key) = &verified.refreshed_public_key {
            if let Err(e) = self
                .credentials
                .update_public_key(&credential.credential_id, public_key)
                .await
            {
                tracing::warn!(
                    identity_id = %identity.id,
                    credential_id = %credential_id,
                    "Failed to refresh stored key material: {}",
                    e
                );
            }
        }

        tracing::info!(
            identity_id = %identity.id,
            credential_id = %credential_id,
            counter = verified.counter,
            "Authentication succeeded"
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::memory::{
        InMemoryChallengeSessionStore, InMemoryCredentialStore, InMemoryIdentityStore,
    };
    use crate::db::models::Credential;
    use crate::db::CredentialStore;
    use crate::webauthn::verifier::{
        DeviceAssertion, DeviceAttestation, DeviceKeyVerifier, PreparedCeremony,
        RegisteredCredential, VerifiedAssertion,
    };
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::sync::Arc;

    /// Device keys whose assertions also rewrite the stored key material
    struct RefreshingVerifier {
        inner: DeviceKeyVerifier,
        refreshed: Vec<u8>,
    }

    impl CeremonyVerifier for RefreshingVerifier {
        type Attestation = DeviceAttestation;
        type Assertion = DeviceAssertion;

        fn prepare_registration(
            &self,
            identity: &Identity,
            challenge: &[u8],
            exclusions: &[Credential],
        ) -> Result<PreparedCeremony, VerifierError> {
            self.inner.prepare_registration(identity, challenge, exclusions)
        }

        fn verify_registration(
            &self,
            state: &[u8],
            challenge: &[u8],
            attestation: &DeviceAttestation,
        ) -> Result<RegisteredCredential, VerifierError> {
            self.inner.verify_registration(state, challenge, attestation)
        }

        fn prepare_authentication(
            &self,
            identity: &Identity,
            challenge: &[u8],
            allowed: &[Credential],
        ) -> Result<PreparedCeremony, VerifierError> {
            self.inner.prepare_authentication(identity, challenge, allowed)
        }

        fn verify_authentication(
            &self,
            state: &[u8],
            challenge: &[u8],
            allowed: &[Credential],
            assertion: &DeviceAssertion,
        ) -> Result<VerifiedAssertion, VerifierError> {
            let verified = self.inner.verify_authentication(state, challenge, allowed, assertion)?;
            Ok(VerifiedAssertion {
                refreshed_public_key: Some(self.refreshed.clone()),
                ..verified
            })
        }
    }

    #[tokio::test]
    async fn refreshed_key_material_is_stored_after_login() {
        let key = SigningKey::generate(&mut OsRng);
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let engine = CeremonyEngine::new(
            RefreshingVerifier {
                inner: DeviceKeyVerifier::new("example.com", "Gift Planner"),
                refreshed: b"refreshed".to_vec(),
            },
            Arc::new(InMemoryIdentityStore::new()),
            credentials.clone(),
            Arc::new(InMemoryChallengeSessionStore::new(Arc::new(ManualClock::default()))),
        );
        let alice = engine.identities().create("Alice", "alice@example.com").await.unwrap();

        let began = engine.begin_registration(alice.id).await.unwrap();
        let attestation = DeviceAttestation::sign(&key, &began.parameters, vec![5; 16], 0).unwrap();
        engine
            .finish_registration(alice.id, &began.session_token, &attestation)
            .await
            .unwrap();

        let began = engine.begin_authentication("alice@example.com").await.unwrap();
        let assertion = DeviceAssertion::sign(&key, &began.parameters, vec![5; 16], None, 1).unwrap();
        engine
            .finish_authentication(alice.id, &began.session_token, &assertion)
            .await
            .unwrap();

        let stored = credentials.find_by_credential_id(&[5; 16]).await.unwrap();
        assert_eq!(stored.public_key, b"refreshed".to_vec());
        assert_eq!(stored.counter, 1);
    }

    #[test]
    fn zero_stored_counter_accepts_anything_once() {
        assert!(counter_advances(0, 0));
        assert!(counter_advances(0, 17));
    }

    #[test]
    fn non_zero_counter_must_strictly_increase() {
        assert!(counter_advances(5, 6));
        assert!(!counter_advances(5, 5));
        assert!(!counter_advances(5, 4));
        assert!(!counter_advances(5, 0));
    }
}
