use std::time::Duration;

use admit::RateLimitExceeded;
use http::HeaderValue;
use http::Response;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::RETRY_AFTER;
use tower::BoxError;

/// The default HTTP rejection handler.
///
/// Answers `429 Too Many Requests` with a JSON body carrying a machine-readable
/// `error` and a human `message`, plus `Retry-After` (whole seconds, at least
/// one) when the engine produced a retry hint.
pub fn too_many_requests<Req, B>(
    _req: &Req,
    rejection: RateLimitExceeded,
) -> Result<Response<B>, BoxError>
where
    B: From<String>,
{
    Ok(rate_limited_response(rejection.retry_after()))
}

pub(crate) fn rate_limited_response<B>(retry_after: Option<Duration>) -> Response<B>
where
    B: From<String>,
{
    let body = serde_json::json!({
        "error": "Too Many Requests",
        "message": "Rate limit exceeded. Please try again later.",
    });

    let mut response = Response::new(B::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(retry_after) = retry_after {
        let secs = retry_after.as_secs().max(1);
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}
