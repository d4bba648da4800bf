//! Buoy command API: relay commands to remote buoys through email.
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod error;
pub mod mail;
pub mod relay;
mod router;
pub mod telemetry;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::FromRef;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use config::{ConfigError, Configuration};
use mail::EmailProvider;
use mail::azure::{AzureEmailClient, ConnectionString};
use relay::CommandRelay;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State backed by an in-memory provider.
#[cfg(test)]
pub(crate) fn test_state(provider: Arc<mail::stub::StubProvider>) -> AppState {
    let config = Arc::new(Configuration::default());
    let relay = CommandRelay::new(
        provider,
        config.email.sender_email.clone(),
        config.email.delivery_timeout(),
    );

    AppState {
        config,
        relay: Arc::new(relay),
        metrics: None,
    }
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub relay: Arc<CommandRelay>,
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for Arc<CommandRelay> {
    fn from_ref(state: &AppState) -> Arc<CommandRelay> {
        Arc::clone(&state.relay)
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let origins = state
        .config
        .cors
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout(),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Turn panics into 500 outcomes.
        .layer(CatchPanicLayer::custom(error::panic_response));

    Router::new()
        .nest("/api/buoy", router::router())
        // `GET /metrics` goes to `render`.
        .route("/metrics", get(telemetry::render))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// Fails when the provider connection string is missing or malformed.
pub fn initialize_state(
    config: Arc<Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, ConfigError> {
    let connection = config
        .email
        .connection_string
        .as_deref()
        .ok_or(ConfigError::MissingConnectionString)?;
    let connection = ConnectionString::from_str(connection)?;

    let provider: Arc<dyn EmailProvider> = Arc::new(AzureEmailClient::new(
        connection,
        config.email.poll_interval(),
    )?);
    let relay = CommandRelay::new(
        provider,
        config.email.sender_email.clone(),
        config.email.delivery_timeout(),
    );

    tracing::info!(sender = config.email.sender_email, "command relay ready");

    Ok(AppState {
        config,
        relay: Arc::new(relay),
        metrics,
    })
}
