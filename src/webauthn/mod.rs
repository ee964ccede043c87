//! # WebAuthn Module
//!
//! The passkey ceremony core: a stateless [`CeremonyEngine`] driving two
//! challenge-response ceremonies over the stores in [`crate::db`] and a
//! pluggable [`verifier::CeremonyVerifier`].
//!
//! ## Submodules
//! - `engine`: the engine itself and challenge generation
//! - `registration`: binding a new credential to an identity
//! - `authentication`: proving control of a credential, with clone detection
//! - `types`: begin-step results and HTTP request bodies
//! - `verifier`: the cryptographic half (webauthn-rs passkeys, ed25519 device keys)
//!
//! ## Flow Overview
//!
//! ### Registration
//! 1. `begin_registration(identity_id)` issues a challenge and a session token
//! 2. The client has its authenticator sign the parameters
//! 3. `finish_registration(identity_id, token, attestation)` consumes the
//!    session and stores the credential
//!
//! ### Authentication
//! 1. `begin_authentication(contact_address)` issues a challenge naming the
//!    identity's credentials
//! 2. The client signs it with one of them
//! 3. `finish_authentication(identity_id, token, assertion)` consumes the
//!    session, checks the signature counter and returns the identity

pub mod authentication;
pub mod engine;
pub mod registration;
pub mod types;
pub mod verifier;

pub use authentication::counter_advances;
pub use engine::{generate_challenge, CeremonyEngine, CHALLENGE_LEN};
pub use types::{AuthenticationChallenge, RegistrationChallenge};
pub use verifier::{CeremonyVerifier, DeviceKeyVerifier, PasskeyVerifier, VerifierError};
