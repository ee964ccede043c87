//! # HTTP Request Handlers
//!
//! A thin JSON adapter over the ceremony engine. Handlers parse the request,
//! call the engine, and shape the response; they hold no ceremony state.
//!
//! ## Submodules
//! - `health`: liveness endpoint
//! - `identities`: creating identities
//! - `auth`: the begin and finish steps of both ceremonies
//!
//! Every handler is generic over the verifier, so the same router serves
//! WebAuthn passkeys in production and ed25519 device keys in tests.

pub mod auth;
pub mod health;
pub mod identities;

use crate::state::AppState;
use crate::webauthn::CeremonyVerifier;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn router<V: CeremonyVerifier>(state: AppState<V>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/identities", post(identities::create_identity::<V>))
        // Registration: issue challenge, then verify attestation
        .route("/api/auth/register/start", post(auth::register_start::<V>))
        .route("/api/auth/register/finish", post(auth::register_finish::<V>))
        // Authentication: issue challenge, then verify assertion
        .route("/api/auth/authenticate/start", post(auth::authenticate_start::<V>))
        .route("/api/auth/authenticate/finish", post(auth::authenticate_finish::<V>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
