//! Telemetry logic.
//! Support logging and metrics.
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{StatusCode, Version};
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::AppState;

const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// Install the global `tracing` subscriber.
///
/// Verbosity follows `RUST_LOG`, with a sane default when unset.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        60.0,
    ];

    metrics::describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Number of HTTP requests handled."
    );
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Time spent answering HTTP requests."
    );
    metrics::describe_counter!(
        "buoy_commands_total",
        Unit::Count,
        "Delivery attempts by outcome."
    );

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Render metrics in Prometheus text format.
pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::default()),
    }
}

/// Track every metrics into one function.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();
    let version = match req.version() {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    };

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    tracing::trace!(version, path, %method, status, latency, "request tracked");

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::mail::stub::StubProvider;
    use crate::{app, make_request, test_state};

    #[test]
    fn test_render_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let mut state = test_state(Arc::new(StubProvider::succeeding()));
        state.metrics = Some(recorder.handle());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        // Spawned tasks run on this thread, so they see the local recorder.
        let (status, body) = metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let app = app(state);
                let body = json!({
                    "imei": "123456789012345",
                    "command": "PING",
                    "recipientEmail": "a@b.com"
                });
                make_request(
                    app.clone(),
                    Method::POST,
                    "/api/buoy/send-command",
                    body.to_string(),
                )
                .await;

                let response =
                    make_request(app, Method::GET, "/metrics", String::default())
                        .await;
                let status = response.status();
                let body =
                    response.into_body().collect().await.unwrap().to_bytes();
                (status, String::from_utf8(body.to_vec()).unwrap())
            })
        });

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"buoy_commands_total{outcome="delivered"} 1"#));
        assert!(body.contains("http_requests_total"));
        assert!(body.contains("http_requests_duration_seconds"));
    }
}
