use std::net::SocketAddr;

use admit::LeakyBucketConfig;
use admit::TokenBucketConfig;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::HeaderName;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_admit::AdmitError;
use tower_admit::AdmitLayer;
use tower_admit::header_key;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tower_admit=debug".into()),
        )
        .init();

    // 10 request bursts per API key (or client address), refilled at 5 per second.
    let api = AdmitLayer::<Request, Response>::token_bucket(TokenBucketConfig {
        capacity: 10.0,
        consume_per_request: 1.0,
        refill_rate: 5.0,
    })
    .with_key_fn(header_key(HeaderName::from_static("x-api-key")))
    .with_bypass(|req: &Request| req.uri().path() == "/api/health");

    // Up to 5 queued requests per client, released two per second.
    let slow = AdmitLayer::<Request, Response>::leaky_bucket(LeakyBucketConfig {
        capacity: 5,
        leak_rate: 2.0,
    });

    let app = Router::new()
        .route("/api", get(|| async { "Hello, admitted!" }))
        .route("/api/health", get(|| async { "ok" }))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_admit_error))
                .layer(api)
                // Route is Infallible; the admission layer expects BoxError.
                .map_err(BoxError::from),
        )
        .route(
            "/slow",
            get(|| async { "Released from the queue" }).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_admit_error))
                    .layer(slow)
                    .map_err(BoxError::from),
            ),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    tracing::info!("listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

async fn handle_admit_error(err: BoxError) -> impl IntoResponse {
    AdmitError::from_boxed(err).into_response()
}
