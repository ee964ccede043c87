//! # Ceremony API Types
//!
//! What the begin steps hand back to callers, and the request bodies the
//! HTTP handlers accept. Each ceremony has two steps:
//! - begin: the server issues a challenge and a session token
//! - finish: the client returns the token with its signed payload
//!
//! The signed payload arrives as raw JSON and is parsed into the verifier's
//! typed attestation or assertion before it reaches the engine.

use super::verifier::CeremonyParameters;
use crate::db::models::SessionToken;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of `begin_registration`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationChallenge {
    pub session_token: SessionToken,
    pub parameters: CeremonyParameters,
}

/// Result of `begin_authentication`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationChallenge {
    pub session_token: SessionToken,
    pub identity_id: Uuid,
    pub parameters: CeremonyParameters,
}

/// Request to create an identity
///
/// ## Example JSON
/// ```json
/// { "display_name": "Alice", "contact_address": "Alice@Example.com" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIdentityRequest {
    pub display_name: String,
    pub contact_address: String,
}

/// Request to start registering a credential for an existing identity
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationStartRequest {
    pub identity_id: Uuid,
}

/// Request to complete registration
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationFinishRequest {
    pub identity_id: Uuid,
    pub session_token: SessionToken,
    /// Attestation from the authenticator
    pub credential: serde_json::Value,
}

/// Request to start authentication
///
/// ## Example JSON
/// ```json
/// { "contact_address": "alice@example.com" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationStartRequest {
    pub contact_address: String,
}

/// Request to complete authentication
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationFinishRequest {
    /// Ignored when the session already names an identity
    pub identity_id: Uuid,
    pub session_token: SessionToken,
    /// Assertion (signed challenge) from the authenticator
    pub credential: serde_json::Value,
}
