//! # Health Check Handler
//!
//! Used by load balancers and monitoring systems.

use axum::Json;
use serde_json::{json, Value};

/// ## Route
/// GET /health
///
/// ## Response
/// ```json
/// { "status": "healthy", "service": "gift-planner-auth" }
/// ```
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME")
    }))
}
