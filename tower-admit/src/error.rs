use std::time::Duration;

use admit::RateLimitExceeded;
use tower::BoxError;

/// Errors produced by the admission middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmitError {
    /// The request was refused by the rate limiter.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header when a retry hint is known.
    #[error("Rate limit exceeded for `{key}`")]
    RateLimited {
        /// The key the request was accounted under.
        key: String,
        /// When the key may next be admitted, if known.
        retry_after: Option<Duration>,
    },

    /// The request was queued but the limiter was torn down before releasing it.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Rate limiter shut down before the request was released")]
    Closed,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl AdmitError {
    /// Recovers an `AdmitError` from a boxed service error, wrapping anything else
    /// as [`AdmitError::Inner`].
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<AdmitError>() {
            Ok(admit) => *admit,
            Err(other) => AdmitError::Inner(other.to_string()),
        }
    }
}

impl From<RateLimitExceeded> for AdmitError {
    fn from(rejection: RateLimitExceeded) -> Self {
        let retry_after = rejection.retry_after();
        AdmitError::RateLimited {
            key: rejection.key,
            retry_after,
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for AdmitError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        match self {
            Self::RateLimited { retry_after, .. } => {
                crate::reject::rate_limited_response(retry_after)
            }
            Self::Closed => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response(),
            Self::Inner(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}
