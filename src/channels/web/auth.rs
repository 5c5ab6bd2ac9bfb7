//! Bearer token authentication for the mesh endpoints.
//!
//! Peer requests are rejected before any handler runs when the shared
//! token does not match. With no token configured the mesh is open, which
//! is only sensible on trusted networks.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

/// Shared auth state injected via axum middleware state.
#[derive(Clone)]
pub struct MeshAuth {
    pub token: Option<String>,
}

/// Middleware validating the `Authorization: Bearer` header.
pub async fn require_bearer(
    State(auth): State<MeshAuth>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &auth.token else {
        return next.run(request).await;
    };

    let presented = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, "Invalid or missing auth token").into_response(),
    }
}
