//! Ed25519 device-key ceremonies
//!
//! A lighter-weight ceremony for clients that hold a raw ed25519 key instead
//! of a platform authenticator. The shapes mirror WebAuthn: the server sends
//! relying party, user handle, challenge and a credential list; the client
//! signs a message over those values plus its own credential id and
//! signature counter.
//!
//! Every variable-length field in a signed message is length-prefixed (u32,
//! big-endian) after a fixed domain tag, so registration and authentication
//! signatures can never be confused with each other.

use super::{
    CeremonyParameters, CeremonyVerifier, PreparedCeremony, RegisteredCredential,
    VerifiedAssertion, VerifierError,
};
use crate::db::models::{encode_credential_id, Credential, Identity};
use base64::prelude::*;
use base64urlsafedata::Base64UrlSafeData;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use serde_json::json;

const REGISTER_TAG: &[u8] = b"gift-planner-auth/register/v1";
const AUTHENTICATE_TAG: &[u8] = b"gift-planner-auth/authenticate/v1";

/// Same bound WebAuthn puts on credential ids
const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Signed registration payload. Byte fields travel as base64url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttestation {
    pub credential_id: Base64UrlSafeData,
    pub public_key: Base64UrlSafeData,
    pub user_handle: Base64UrlSafeData,
    pub counter: u32,
    pub signature: Base64UrlSafeData,
}

/// Signed authentication payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssertion {
    pub credential_id: Base64UrlSafeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Base64UrlSafeData>,
    pub counter: u32,
    pub signature: Base64UrlSafeData,
}

#[derive(Serialize, Deserialize)]
struct RegistrationState {
    user_handle: Vec<u8>,
    excluded: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct AuthenticationState {
    user_handle: Vec<u8>,
    allowed: Vec<Vec<u8>>,
}

fn signing_message(tag: &[u8], fields: &[&[u8]]) -> Vec<u8> {
    let mut message = tag.to_vec();
    for field in fields {
        message.extend_from_slice(&(field.len() as u32).to_be_bytes());
        message.extend_from_slice(field);
    }
    message
}

fn registration_message(
    rp_id: &str,
    challenge: &[u8],
    user_handle: &[u8],
    credential_id: &[u8],
    public_key: &[u8],
    counter: u32,
) -> Vec<u8> {
    signing_message(
        REGISTER_TAG,
        &[
            rp_id.as_bytes(),
            challenge,
            user_handle,
            credential_id,
            public_key,
            &counter.to_be_bytes(),
        ],
    )
}

fn assertion_message(
    rp_id: &str,
    challenge: &[u8],
    credential_id: &[u8],
    user_handle: Option<&[u8]>,
    counter: u32,
) -> Vec<u8> {
    signing_message(
        AUTHENTICATE_TAG,
        &[
            rp_id.as_bytes(),
            challenge,
            credential_id,
            user_handle.unwrap_or_default(),
            &counter.to_be_bytes(),
        ],
    )
}

fn parameter_str<'a>(parameters: &'a CeremonyParameters, pointer: &str) -> Result<&'a str, VerifierError> {
    parameters
        .0
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .ok_or_else(|| VerifierError::Malformed(format!("ceremony parameters missing {}", pointer)))
}

fn parameter_bytes(parameters: &CeremonyParameters, pointer: &str) -> Result<Vec<u8>, VerifierError> {
    BASE64_URL_SAFE_NO_PAD
        .decode(parameter_str(parameters, pointer)?.as_bytes())
        .map_err(|e| VerifierError::Malformed(format!("{}: {}", pointer, e)))
}

fn parse_verifying_key(bytes: &[u8]) -> Result<VerifyingKey, VerifierError> {
    let bytes: &[u8; PUBLIC_KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| VerifierError::Malformed(format!("public key must be {} bytes", PUBLIC_KEY_LENGTH)))?;
    VerifyingKey::from_bytes(bytes).map_err(|e| VerifierError::Malformed(e.to_string()))
}

fn verify_signature(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<(), VerifierError> {
    let signature =
        Signature::from_slice(signature).map_err(|e| VerifierError::Malformed(e.to_string()))?;
    key.verify_strict(message, &signature)
        .map_err(|e| VerifierError::Signature(e.to_string()))
}

fn credential_list(credentials: &[Credential]) -> serde_json::Value {
    credentials
        .iter()
        .map(|c| json!({ "type": "ed25519", "id": c.display_id() }))
        .collect()
}

impl DeviceAttestation {
    /// Client side: sign the registration parameters returned by the server
    pub fn sign(
        key: &SigningKey,
        parameters: &CeremonyParameters,
        credential_id: Vec<u8>,
        counter: u32,
    ) -> Result<Self, VerifierError> {
        let rp_id = parameter_str(parameters, "/rp/id")?;
        let challenge = parameter_bytes(parameters, "/challenge")?;
        let user_handle = parameter_bytes(parameters, "/user/id")?;
        let public_key = key.verifying_key().to_bytes().to_vec();

        let message = registration_message(
            rp_id,
            &challenge,
            &user_handle,
            &credential_id,
            &public_key,
            counter,
        );

        Ok(Self {
            credential_id: credential_id.into(),
            public_key: public_key.into(),
            user_handle: user_handle.into(),
            counter,
            signature: key.sign(&message).to_bytes().to_vec().into(),
        })
    }
}

impl DeviceAssertion {
    /// Client side: sign the authentication parameters returned by the server
    pub fn sign(
        key: &SigningKey,
        parameters: &CeremonyParameters,
        credential_id: Vec<u8>,
        user_handle: Option<Vec<u8>>,
        counter: u32,
    ) -> Result<Self, VerifierError> {
        let rp_id = parameter_str(parameters, "/rpId")?;
        let challenge = parameter_bytes(parameters, "/challenge")?;

        let message = assertion_message(
            rp_id,
            &challenge,
            &credential_id,
            user_handle.as_deref(),
            counter,
        );

        Ok(Self {
            credential_id: credential_id.into(),
            user_handle: user_handle.map(Base64UrlSafeData::from),
            counter,
            signature: key.sign(&message).to_bytes().to_vec().into(),
        })
    }
}

/// Verifier for ed25519 device keys
#[derive(Debug, Clone)]
pub struct DeviceKeyVerifier {
    rp_id: String,
    rp_name: String,
}

impl DeviceKeyVerifier {
    pub fn new(rp_id: impl Into<String>, rp_name: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            rp_name: rp_name.into(),
        }
    }
}

impl CeremonyVerifier for DeviceKeyVerifier {
    type Attestation = DeviceAttestation;
    type Assertion = DeviceAssertion;

    fn prepare_registration(
        &self,
        identity: &Identity,
        challenge: &[u8],
        exclusions: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError> {
        let user_handle = identity.user_handle();

        let parameters = CeremonyParameters(json!({
            "rp": { "id": self.rp_id, "name": self.rp_name },
            "user": {
                "id": BASE64_URL_SAFE_NO_PAD.encode(&user_handle),
                "name": identity.contact_address,
                "displayName": identity.display_name,
            },
            "challenge": BASE64_URL_SAFE_NO_PAD.encode(challenge),
            "excludeCredentials": credential_list(exclusions),
        }));

        let state = serde_json::to_vec(&RegistrationState {
            user_handle,
            excluded: exclusions.iter().map(|c| c.credential_id.clone()).collect(),
        })?;

        Ok(PreparedCeremony {
            parameters,
            challenge: challenge.to_vec(),
            state,
        })
    }

    fn verify_registration(
        &self,
        state: &[u8],
        challenge: &[u8],
        attestation: &DeviceAttestation,
    ) -> Result<RegisteredCredential, VerifierError> {
        let state: RegistrationState = serde_json::from_slice(state)?;
        let credential_id: &[u8] = attestation.credential_id.as_ref();
        let user_handle: &[u8] = attestation.user_handle.as_ref();
        let public_key: &[u8] = attestation.public_key.as_ref();

        if user_handle != state.user_handle.as_slice() {
            return Err(VerifierError::UserHandleMismatch);
        }
        if credential_id.is_empty() || credential_id.len() > MAX_CREDENTIAL_ID_LEN {
            return Err(VerifierError::Malformed(format!(
                "credential id must be 1..={} bytes",
                MAX_CREDENTIAL_ID_LEN
            )));
        }
        if state.excluded.iter().any(|id| id.as_slice() == credential_id) {
            return Err(VerifierError::CredentialExcluded(encode_credential_id(credential_id)));
        }

        let key = parse_verifying_key(public_key)?;
        let message = registration_message(
            &self.rp_id,
            challenge,
            user_handle,
            credential_id,
            public_key,
            attestation.counter,
        );
        verify_signature(&key, &message, attestation.signature.as_ref())?;

        Ok(RegisteredCredential {
            credential_id: credential_id.to_vec(),
            public_key: key.to_bytes().to_vec(),
            counter: attestation.counter,
        })
    }

    fn prepare_authentication(
        &self,
        identity: &Identity,
        challenge: &[u8],
        allowed: &[Credential],
    ) -> Result<PreparedCeremony, VerifierError> {
        let parameters = CeremonyParameters(json!({
            "rpId": self.rp_id,
            "challenge": BASE64_URL_SAFE_NO_PAD.encode(challenge),
            "allowCredentials": credential_list(allowed),
        }));

        let state = serde_json::to_vec(&AuthenticationState {
            user_handle: identity.user_handle(),
            allowed: allowed.iter().map(|c| c.credential_id.clone()).collect(),
        })?;

        Ok(PreparedCeremony {
            parameters,
            challenge: challenge.to_vec(),
            state,
        })
    }

    fn verify_authentication(
        &self,
        state: &[u8],
        challenge: &[u8],
        allowed: &[Credential],
        assertion: &DeviceAssertion,
    ) -> Result<VerifiedAssertion, VerifierError> {
        let state: AuthenticationState = serde_json::from_slice(state)?;
        let credential_id: &[u8] = assertion.credential_id.as_ref();
        let user_handle: Option<&[u8]> = assertion.user_handle.as_ref().map(|h| h.as_ref());

        if let Some(handle) = user_handle {
            if handle != state.user_handle.as_slice() {
                return Err(VerifierError::UserHandleMismatch);
            }
        }

        let not_allowed = || VerifierError::CredentialNotAllowed(encode_credential_id(credential_id));
        if !state.allowed.iter().any(|id| id.as_slice() == credential_id) {
            return Err(not_allowed());
        }
        // Issued at begin time but possibly removed since
        let credential = allowed
            .iter()
            .find(|c| c.credential_id == credential_id)
            .ok_or_else(not_allowed)?;

        let key = parse_verifying_key(&credential.public_key)?;
        let message = assertion_message(
            &self.rp_id,
            challenge,
            credential_id,
            user_handle,
            assertion.counter,
        );
        verify_signature(&key, &message, assertion.signature.as_ref())?;

        Ok(VerifiedAssertion {
            credential_id: credential_id.to_vec(),
            counter: assertion.counter,
            refreshed_public_key: None,
        })
    }
}
