//! WebAuthn passkeys through `webauthn-rs`
//!
//! `webauthn-rs` generates its own challenge inside
//! `start_passkey_registration` / `start_passkey_authentication` and keeps it
//! in the returned state, so this verifier reports that challenge back
//! instead of the one the engine offered. The library checks it against the
//! client data itself at finish time.
//!
//! ## What gets stored
//! The public key material of a credential is the whole serialized
//! `Passkey`, which includes the COSE key and the metadata webauthn-rs needs
//! to verify later assertions. The counter the authenticator attested at
//! registration is copied into the credential row, and counter policy
//! belongs to the ceremony engine. After each successful assertion the blob
//! is refreshed with `Passkey::update_credential` so its own copy of the
//! counter and backup state does not go stale.

use super::{
    CeremonyParameters, CeremonyVerifier, PreparedCeremony, RegisteredCredential,
    VerifiedAssertion, VerifierError,
};
use crate::db::models::{encode_credential_id, Credential, Identity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webauthn_rs::prelude::*;

impl From<WebauthnError> for VerifierError {
    fn from(e: WebauthnError) -> Self {
        VerifierError::Library(e.to_string())
    }
}

/// Passkey verifier for browser and platform authenticators
#[derive(Clone)]
pub struct PasskeyVerifier {
    webauthn: Arc<Webauthn>,
}

impl PasskeyVerifier {
    /// Configure the relying party
    ///
    /// `rp_id` must be the effective domain of `rp_origin`, e.g. `localhost`
    /// for `http://localhost:8080`.
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let webauthn = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .build()?;

        Ok(Self {
            webauthn: Arc::new(webauthn),
        })
    }
}

impl std::fmt::Debug for PasskeyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeyVerifier").finish_non_exhaustive()
    }
}

/// Session state for a passkey registration
///
/// webauthn-rs only enforces the exclusion list in the browser, so the ids
/// are kept here and checked again on finish.
#[derive(Serialize, Deserialize)]
struct RegistrationState {
    registration: PasskeyRegistration,
    excluded: Vec<Vec<u8>>,
}

/// Signature counter recorded in a serialized `Passkey`
fn attested_counter(passkey: &serde_json::Value) -> Result<u32, VerifierError> {
    passkey
        .pointer("/cred/counter")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| VerifierError::Malformed("passkey has no signature counter".to_string()))
}

fn stored_passkeys(credentials: &[Credential]) -> Result<Vec<Passkey>, VerifierError> {
    credentials
        .iter()
        .map(|c| serde_json::from_slice::<Passkey>(&c.public_key).map_err(VerifierError::from))
        .collect()
}

/// Re-serialized `Passkey` for `credential_id` when the assertion changed it
fn refreshed_passkey(
    allowed: &[Credential],
    credential_id: &[u8],
    result: &AuthenticationResult,
) -> Result<Option<Vec<u8>>, VerifierError> {
    let Some(stored) = allowed.iter().find(|c| c.credential_id == credential_id) else {
        return Ok(None);
    };
    let mut passkey: Passkey = serde_json::from_slice(&stored.public_key)?;

    match passkey.update_credential(result) {
        Some(true) => Ok(Some(serde_json::to_vec(&passkey)?)),
        _ => Ok(None),
    }
}

impl CeremonyVerifier for PasskeyVerifier {
    type Attestation = RegisterPublicKeyCredential;
    type Assertion = PublicKeyCredential;

    fn prepare_registration(
        &self,
        identity: &Identity,
        _challenge: &[u8],
        exclusions: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError> {
        let exclude: Vec<CredentialID> = exclusions
            .iter()
            .map(|c| CredentialID::from(c.credential_id.clone()))
            .collect();

        // The user handle is the 16 raw bytes of the identity UUID
        let (ccr, registration) = self.webauthn.start_passkey_registration(
            identity.id,
            &identity.contact_address,
            &identity.display_name,
            (!exclude.is_empty()).then_some(exclude),
        )?;

        let challenge: &[u8] = ccr.public_key.challenge.as_ref();
        let state = RegistrationState {
            registration,
            excluded: exclusions.iter().map(|c| c.credential_id.clone()).collect(),
        };

        Ok(PreparedCeremony {
            challenge: challenge.to_vec(),
            state: serde_json::to_vec(&state)?,
            parameters: CeremonyParameters(serde_json::to_value(&ccr)?),
        })
    }

    fn verify_registration(
        &self,
        state: &[u8],
        _challenge: &[u8],
        attestation: &RegisterPublicKeyCredential,
    ) -> Result<RegisteredCredential, VerifierError> {
        let state: RegistrationState = serde_json::from_slice(state)?;

        let raw_id: &[u8] = attestation.raw_id.as_ref();
        if state.excluded.iter().any(|id| id.as_slice() == raw_id) {
            return Err(VerifierError::CredentialExcluded(encode_credential_id(raw_id)));
        }

        let passkey = self
            .webauthn
            .finish_passkey_registration(attestation, &state.registration)?;

        let credential_id: &[u8] = passkey.cred_id().as_ref();
        let serialized = serde_json::to_value(&passkey)?;

        Ok(RegisteredCredential {
            credential_id: credential_id.to_vec(),
            counter: attested_counter(&serialized)?,
            public_key: serde_json::to_vec(&serialized)?,
        })
    }

    fn prepare_authentication(
        &self,
        _identity: &Identity,
        _challenge: &[u8],
        allowed: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError> {
        let passkeys = stored_passkeys(allowed)?;

        let (rcr, auth_state) = self.webauthn.start_passkey_authentication(&passkeys)?;

        let challenge: &[u8] = rcr.public_key.challenge.as_ref();

        Ok(PreparedCeremony {
            challenge: challenge.to_vec(),
            state: serde_json::to_vec(&auth_state)?,
            parameters: CeremonyParameters(serde_json::to_value(&rcr)?),
        })
    }

    fn verify_authentication(
        &self,
        state: &[u8],
        _challenge: &[u8],
        allowed: &[Credential],
        assertion: &PublicKeyCredential,
    ) -> Result<VerifiedAssertion, VerifierError> {
        // The allow-list was captured into the state at begin time
        let auth_state: PasskeyAuthentication = serde_json::from_slice(state)?;

        let result = self
            .webauthn
            .finish_passkey_authentication(assertion, &auth_state)?;

        let credential_id: &[u8] = result.cred_id().as_ref();

        Ok(VerifiedAssertion {
            credential_id: credential_id.to_vec(),
            counter: result.counter(),
            refreshed_public_key: refreshed_passkey(allowed, credential_id, &result)?,
        })
    }
}
