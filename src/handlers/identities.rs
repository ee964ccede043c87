//! # Identity Handlers
//!
//! Identities must exist before a credential can be registered to them.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::webauthn::types::CreateIdentityRequest;
use crate::webauthn::CeremonyVerifier;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

/// Create an identity
///
/// ## Route
/// POST /api/identities
///
/// ## Responses
/// - 201 with the identity
/// - 400 when either field is blank
/// - 409 when the contact address is taken (compared ignoring case)
pub async fn create_identity<V: CeremonyVerifier>(
    State(state): State<AppState<V>>,
    Json(req): Json<CreateIdentityRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::BadRequest("display_name is required".to_string()));
    }
    if req.contact_address.trim().is_empty() {
        return Err(AppError::BadRequest("contact_address is required".to_string()));
    }

    let identity = state
        .engine
        .identities()
        .create(display_name, &req.contact_address)
        .await?;

    tracing::info!(identity_id = %identity.id, "Identity created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": identity.id,
            "display_name": identity.display_name,
            "contact_address": identity.contact_address,
            "created_at": identity.created_at
        })),
    ))
}
