use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use overwatch_core::OverwatchError;
use serde_json::json;
use tracing::error;

/// Errors surfaced over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] OverwatchError),

    #[error("API key required")]
    MissingKey,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Domain(e) => match e {
                OverwatchError::Validation(_) | OverwatchError::Config(_) | OverwatchError::Json(_) => {
                    StatusCode::BAD_REQUEST
                }
                OverwatchError::NotFound(_) => StatusCode::NOT_FOUND,
                OverwatchError::IllegalTransition { .. } | OverwatchError::Frozen(_) => {
                    StatusCode::CONFLICT
                }
                OverwatchError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
                OverwatchError::Unauthorized(_) => StatusCode::FORBIDDEN,
                OverwatchError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::MissingKey | ApiError::InvalidKey => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Domain(e) => e.code(),
            ApiError::MissingKey => "missing_api_key",
            ApiError::InvalidKey => "invalid_api_key",
            ApiError::RateLimited => "rate_limited",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "Request failed");
        }
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use overwatch_core::AgentState;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (OverwatchError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (OverwatchError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                OverwatchError::IllegalTransition {
                    agent_id: "a1".into(),
                    from: AgentState::Suspended,
                    to: AgentState::Busy,
                },
                StatusCode::CONFLICT,
            ),
            (OverwatchError::Frozen("x".into()), StatusCode::CONFLICT),
            (OverwatchError::NoCapacity("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (OverwatchError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (OverwatchError::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::MissingKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
