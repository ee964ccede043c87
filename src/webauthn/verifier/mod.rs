//! # Cryptographic Verifiers
//!
//! The ceremony engine never touches public-key cryptography itself. It hands
//! the stored challenge and the verifier's own state back to a
//! [`CeremonyVerifier`] and acts on what comes out: a new credential after
//! registration, or a credential id plus signature counter after
//! authentication.
//!
//! Two implementations ship with the crate:
//! - [`PasskeyVerifier`]: WebAuthn passkeys through `webauthn-rs`, used by the
//!   server binary
//! - [`DeviceKeyVerifier`]: raw ed25519 device keys, for headless clients and
//!   tests

pub mod device_key;
pub mod passkey;

pub use device_key::{DeviceAssertion, DeviceAttestation, DeviceKeyVerifier};
pub use passkey::PasskeyVerifier;

use crate::db::models::{Credential, Identity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-facing options for one ceremony (relying party, user, challenge,
/// allowed or excluded credentials). Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CeremonyParameters(pub serde_json::Value);

/// Output of a `prepare_*` call
#[derive(Debug, Clone)]
pub struct PreparedCeremony {
    /// Sent to the client
    pub parameters: CeremonyParameters,
    /// The challenge the client must sign. Normally the one the engine
    /// passed in; a verifier that mints its own nonce reports it here.
    pub challenge: Vec<u8>,
    /// Private verifier state, stored with the session and handed back at
    /// verify time
    pub state: Vec<u8>,
}

/// A credential proven by a registration attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub counter: u32,
}

/// A credential that produced a valid authentication assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    pub credential_id: Vec<u8>,
    /// Signature counter the authenticator reported in the assertion
    pub counter: u32,
    /// New key material to store for the credential, when verifying the
    /// assertion changed it
    pub refreshed_public_key: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum VerifierError {
    /// Payload, stored state or key material could not be decoded
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("signature verification failed: {0}")]
    Signature(String),

    /// The user handle in the payload is not the one the ceremony was issued for
    #[error("user handle does not match the ceremony")]
    UserHandleMismatch,

    #[error("credential {0} is not allowed for this ceremony")]
    CredentialNotAllowed(String),

    #[error("credential {0} is already registered to this identity")]
    CredentialExcluded(String),

    /// Error reported by an underlying WebAuthn library
    #[error("{0}")]
    Library(String),
}

impl From<serde_json::Error> for VerifierError {
    fn from(e: serde_json::Error) -> Self {
        VerifierError::Malformed(e.to_string())
    }
}

/// Anything that can run the cryptographic half of a ceremony
///
/// Calls are synchronous and expected to finish without blocking on I/O.
pub trait CeremonyVerifier: Send + Sync + 'static {
    /// Signed registration payload from the client
    type Attestation: DeserializeOwned + Send + Sync;
    /// Signed authentication payload from the client
    type Assertion: DeserializeOwned + Send + Sync;

    fn prepare_registration(
        &self,
        identity: &Identity,
        challenge: &[u8],
        exclusions: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError>;

    fn verify_registration(
        &self,
        state: &[u8],
        challenge: &[u8],
        attestation: &Self::Attestation,
    ) -> Result<RegisteredCredential, VerifierError>;

    fn prepare_authentication(
        &self,
        identity: &Identity,
        challenge: &[u8],
        allowed: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError>;

    fn verify_authentication(
        &self,
        state: &[u8],
        challenge: &[u8],
        allowed: &[Credential],
        assertion: &Self::Assertion,
    ) -> Result<VerifiedAssertion, VerifierError>;
}
