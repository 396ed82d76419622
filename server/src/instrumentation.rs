//! Instrumentation routes: Prometheus exposition on `/metrics` and CPU
//! profiling under `/debug/pprof`. The paths are a contract with external
//! monitoring tooling and must stay stable.

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

use crate::pprof;

const BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 250.0,
];

// The prometheus recorder is process-global; installing twice panics. Lazy
// lets any number of servers in one process share the one recorder.
static PROMETHEUS: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
});

/// Add the `/metrics` exposition route and the `/debug/pprof` profiling
/// routes. Registering these paths twice on one router is a caller error;
/// axum panics on duplicate routes.
pub fn register_instrumentation(router: Router) -> Router {
    let recorder_handle = PROMETHEUS.clone();
    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .route("/debug/pprof/profile", get(pprof::handle_profile_report))
        .route(
            "/debug/pprof/flamegraph",
            get(pprof::handle_profile_flamegraph),
        )
}

/// Middleware recording request count and latency per method/path/status.
pub async fn track_requests(request: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = request.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        request.uri().path().to_owned()
    };
    let method = request.method().clone();

    let response = next.run(request).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
