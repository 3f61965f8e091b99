//! Shared-secret request authorization.
//!
//! A request is allowed only when its `Authorization` header equals the
//! configured secret byte for byte. There is no default secret.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::api::ApiError;

/// Outcome of checking one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
}

/// Compares the `Authorization` header against a configured secret.
pub struct Authorizer {
    secret: Vec<u8>,
}

impl Authorizer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
        }
    }

    /// Decide whether the request headers carry the secret.
    pub fn authorize(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return AuthDecision::Deny;
        };
        let Ok(value) = value.to_str() else {
            return AuthDecision::Deny;
        };

        let matches = value.len() == self.secret.len()
            && bool::from(value.as_bytes().ct_eq(&self.secret));
        if matches {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer").finish_non_exhaustive()
    }
}

/// Middleware rejecting unauthorized requests with `403`.
pub async fn require_authorization(
    State(authorizer): State<Arc<Authorizer>>,
    request: Request,
    next: Next,
) -> Response {
    match authorizer.authorize(request.headers()) {
        AuthDecision::Allow => next.run(request).await,
        AuthDecision::Deny => {
            debug!(method = %request.method(), path = %request.uri().path(), "Request denied");
            ApiError::Forbidden.into_response()
        }
    }
}
