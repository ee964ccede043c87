//! # Error Handling
//!
//! Error types for each layer of the service:
//!
//! - [`StoreError`]: persistence failures from the identity, credential and
//!   challenge-session stores
//! - [`SessionError`]: the outcome of consuming a challenge session
//! - [`CeremonyError`]: the terminal failures of a registration or
//!   authentication ceremony
//! - [`AppError`]: what the HTTP handlers return, converted into a JSON
//!   response
//!
//! Ceremony errors are never retried inside the core. The caller may start a
//! fresh ceremony, but a failed or expired one cannot be resumed.

use crate::webauthn::verifier::VerifierError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Persistence-layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// No row for the requested key
    #[error("Not found: {0}")]
    NotFound(String),

    /// A unique key already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store could not be reached or failed the query
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded back into a model
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            err @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Result of trying to consume a challenge session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Never existed, or already consumed
    #[error("Challenge session not found")]
    NotFound,

    /// Existed but outlived its TTL; the record is removed by the same call
    #[error("Challenge session expired")]
    Expired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal failures of a ceremony attempt
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Ceremony session not found")]
    SessionNotFound,

    #[error("Ceremony session expired")]
    SessionExpired,

    /// Wrong ceremony kind, or the session was started for another identity
    #[error("Ceremony mismatch: {0}")]
    CeremonyMismatch(String),

    #[error("Attestation invalid: {0}")]
    AttestationInvalid(#[source] VerifierError),

    /// Reported signature counter did not advance past the stored one
    #[error("Possible cloned authenticator for credential {credential_id}")]
    PossibleCloneDetected { credential_id: String },

    /// The credential identifier is already registered
    #[error("Credential already registered")]
    Conflict,

    /// Persistence outage; the caller decides whether to retry
    #[error("Service unavailable: {0}")]
    Unavailable(#[source] StoreError),
}

impl From<SessionError> for CeremonyError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => CeremonyError::SessionNotFound,
            SessionError::Expired => CeremonyError::SessionExpired,
            SessionError::Store(e) => CeremonyError::Unavailable(e),
        }
    }
}

/// Application-wide error type for the HTTP layer
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Request payload could not be parsed into the verifier's types
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Generic rejection used when account-enumeration hardening is on
    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl AppError {
    /// Convert a ceremony failure, optionally collapsing everything that could
    /// reveal whether a contact address exists into one generic response
    pub fn from_ceremony(e: CeremonyError, generic_auth_errors: bool) -> Self {
        match e {
            CeremonyError::IdentityNotFound
            | CeremonyError::AttestationInvalid(_)
            | CeremonyError::PossibleCloneDetected { .. }
                if generic_auth_errors =>
            {
                tracing::debug!("Collapsing ceremony error to generic response: {}", e);
                AppError::InvalidCredentials
            }
            other => AppError::Ceremony(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Ceremony(e) => match e {
                CeremonyError::IdentityNotFound => (StatusCode::NOT_FOUND, e.to_string()),
                CeremonyError::SessionNotFound => (StatusCode::NOT_FOUND, e.to_string()),
                CeremonyError::SessionExpired => (StatusCode::GONE, e.to_string()),
                CeremonyError::CeremonyMismatch(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                // Verifier detail stays in the logs
                CeremonyError::AttestationInvalid(_) => {
                    (StatusCode::UNAUTHORIZED, "Authentication error".to_string())
                }
                CeremonyError::PossibleCloneDetected { .. } => {
                    (StatusCode::UNAUTHORIZED, "Authenticator rejected".to_string())
                }
                CeremonyError::Conflict => (StatusCode::CONFLICT, e.to_string()),
                CeremonyError::Unavailable(inner) => {
                    tracing::error!("Store unavailable: {:?}", inner);
                    (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".to_string())
                }
            },
            AppError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
                StoreError::Conflict(_) => (StatusCode::CONFLICT, "Already exists".to_string()),
                StoreError::Unavailable(_) | StoreError::Corrupt(_) => {
                    tracing::error!("Database error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
                }
            },
            AppError::Serialization(e) => {
                tracing::debug!("Rejected malformed payload: {:?}", e);
                (StatusCode::BAD_REQUEST, "Malformed payload".to_string())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Result alias for the ceremony engine
pub type CeremonyResult<T> = Result<T, CeremonyError>;
