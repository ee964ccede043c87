use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::webauthn::types::*;
use crate::webauthn::CeremonyVerifier;
use axum::{extract::State, Json};
use serde_json::{json, Value};

// Registration endpoints

pub async fn register_start<V: CeremonyVerifier>(
    State(state): State<AppState<V>>,
    Json(req): Json<RegistrationStartRequest>,
) -> AppResult<Json<Value>> {
    let challenge = state
        .engine
        .begin_registration(req.identity_id)
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!(challenge)))
}

pub async fn register_finish<V: CeremonyVerifier>(
    State(state): State<AppState<V>>,
    Json(req): Json<RegistrationFinishRequest>,
) -> AppResult<Json<Value>> {
    let attestation: V::Attestation = serde_json::from_value(req.credential)?;

    state
        .engine
        .finish_registration(req.identity_id, &req.session_token, &attestation)
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({
        "success": true,
        "message": "Registration successful"
    })))
}

// Authentication endpoints

pub async fn authenticate_start<V: CeremonyVerifier>(
    State(state): State<AppState<V>>,
    Json(req): Json<AuthenticationStartRequest>,
) -> AppResult<Json<Value>> {
    let challenge = state
        .engine
        .begin_authentication(&req.contact_address)
        .await
        .map_err(|e| AppError::from_ceremony(e, state.generic_auth_errors))?;

    Ok(Json(json!(challenge)))
}

pub async fn authenticate_finish<V: CeremonyVerifier>(
    State(state): State<AppState<V>>,
    Json(req): Json<AuthenticationFinishRequest>,
) -> AppResult<Json<Value>> {
    let assertion: V::Assertion = serde_json::from_value(req.credential)?;

    let identity = state
        .engine
        .finish_authentication(req.identity_id, &req.session_token, &assertion)
        .await
        .map_err(|e| AppError::from_ceremony(e, state.generic_auth_errors))?;

    Ok(Json(json!({
        "success": true,
        "identity_id": identity.id,
        "display_name": identity.display_name,
        "message": "Authentication successful"
    })))
}
