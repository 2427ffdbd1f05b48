//! # Tower Admit
//!
//! `tower-admit` puts the keyed [`admit`] engines in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## Request flow
//!
//! For every request the [`AdmitService`]:
//!
//! 1. **Bypass**: evaluates the optional bypass predicate. Bypassed requests go
//!    straight to the inner service without touching any limiter state.
//! 2. **Key**: derives the rate limit key with the configured key function.
//! 3. **Dispatch**: calls the engine through the contract it exposes. A
//!    synchronous engine admits or rejects immediately. A queueing engine
//!    (the leaky bucket) holds the request until its unit is drained.
//! 4. **Rejection**: hands a refused request to the rejection handler instead of
//!    the inner service. The default handler fails the request with
//!    [`AdmitError::RateLimited`]; the HTTP constructors answer
//!    `429 Too Many Requests` instead.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`AdmitError`] and lets [`client_addr`]
//!   read axum's `ConnectInfo<SocketAddr>`.

mod error;
mod key;
mod layer;
mod reject;
mod service;


pub use error::AdmitError;
pub use key::UNKNOWN_KEY;
pub use key::client_addr;
pub use key::forwarded_client_addr;
pub use key::header_key;
pub use layer::AdmitLayer;
pub use layer::BypassFn;
pub use layer::KeyFn;
pub use layer::RejectFn;
pub use reject::too_many_requests;
pub use service::AdmitService;
pub use service::ResponseFuture;
