//! # Gift Planner Authentication
//!
//! Passwordless sign-in built on two challenge-response ceremonies:
//! registering a public-key credential to an identity, and authenticating
//! with it later. The ceremony engine is stateless between calls; everything
//! a finish step needs lives in a single-use, time-limited challenge session.
//!
//! ## Key Concepts
//! - **Identity**: a user, found by a normalized contact address
//! - **Credential**: a registered public key plus its signature counter
//! - **Challenge session**: the server-held half of an in-flight ceremony,
//!   consumed at most once
//! - **Clone detection**: a signature counter that fails to advance rejects
//!   the authentication

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod state;
pub mod webauthn;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult, CeremonyError, CeremonyResult, SessionError, StoreError};
pub use handlers::router;
pub use state::AppState;
pub use webauthn::CeremonyEngine;
