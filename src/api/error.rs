//! HTTP error mapping.

use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use tracing::{error, warn};

use crate::services::ServiceError;
use crate::storage::StoreError;

/// Errors returned by the HTTP routes.
///
/// The response body carries a stable code and a short message. Backend
/// details are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable")]
    StoreUnavailable,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Forbidden => "forbidden",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::StoreUnavailable => "store_unavailable",
            ApiError::Internal => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Forbidden => "Forbidden".to_string(),
            ApiError::BadRequest(reason) => reason.clone(),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::StoreUnavailable => "Store temporarily unavailable".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            warn!(error = %err, "Store unavailable");
            ApiError::StoreUnavailable
        } else {
            // Missing grants and undecodable items are faults on our side.
            error!(error = %err, "Store failure");
            ApiError::Internal
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Invalid(reason) => ApiError::BadRequest(reason),
            ServiceError::Store(err) => err.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capability::Table;

    #[test]
    fn test_store_errors_map_to_status() {
        let cases = [
            (
                StoreError::Unavailable("connection reset".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::Timeout {
                    operation: "transactions.list",
                    after: Duration::from_secs(1),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::Forbidden {
                    holder: "route",
                    capability: Table::Periods.write(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StoreError::Serialization("bad item".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_invalid_service_input_is_bad_request() {
        let err = ApiError::from(ServiceError::Invalid("month is wrong".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_body_hides_backend_detail() {
        let response =
            ApiError::from(StoreError::Unavailable("secret-host:8000 refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "store_unavailable");
        assert!(!bytes.windows(11).any(|w| w == b"secret-host"));
    }
}
