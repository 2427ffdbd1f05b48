use std::net::SocketAddr;

use http::HeaderMap;
use http::HeaderName;
use http::Request;

/// The key used when no client identity can be derived from a request.
pub const UNKNOWN_KEY: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// The default key function: the client's network address.
///
/// Reads the peer address from the request extensions (a plain `SocketAddr`,
/// or axum's `ConnectInfo<SocketAddr>` with the `axum` feature). Falls back to
/// [`UNKNOWN_KEY`], so every unidentifiable client shares one key.
///
/// Client-supplied headers are ignored; see [`forwarded_client_addr`] for
/// deployments behind a trusted proxy.
pub fn client_addr<B>(req: &Request<B>) -> String {
    peer_addr(req.extensions()).unwrap_or_else(|| UNKNOWN_KEY.to_owned())
}

/// A key function for services behind a trusted reverse proxy.
///
/// Looks, in order, at the first `X-Forwarded-For` entry, `X-Real-IP`, and the
/// peer address, then falls back to [`UNKNOWN_KEY`]. Clients can set these
/// headers freely, so only use this when a proxy overwrites them.
pub fn forwarded_client_addr<B>(req: &Request<B>) -> String {
    forwarded_for(req.headers())
        .or_else(|| header_value(req.headers(), X_REAL_IP))
        .or_else(|| peer_addr(req.extensions()))
        .unwrap_or_else(|| UNKNOWN_KEY.to_owned())
}

/// A key function reading a credential header such as `x-api-key`.
///
/// Requests without the header fall back to [`client_addr`].
pub fn header_key<B>(name: HeaderName) -> impl Fn(&Request<B>) -> String + Send + Sync + 'static
where
    B: 'static,
{
    move |req| {
        header_value(req.headers(), name.as_str()).unwrap_or_else(|| client_addr(req))
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_value(headers, X_FORWARDED_FOR)?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn peer_addr(extensions: &http::Extensions) -> Option<String> {
    #[cfg(feature = "axum")]
    if let Some(axum::extract::ConnectInfo(addr)) =
        extensions.get::<axum::extract::ConnectInfo<SocketAddr>>()
    {
        return Some(addr.ip().to_string());
    }
    extensions
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
}
