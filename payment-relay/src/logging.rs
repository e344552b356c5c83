use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{error, info, trace, warn};

/// Logs one line per request. Probe endpoints only log at trace level.
pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    if matches!(path.as_str(), "/ping" | "/healthz" | "/metrics") {
        trace!(%method, path, status = status.as_u16(), latency_ms, "request completed");
    } else if status.is_server_error() {
        error!(%method, path, status = status.as_u16(), latency_ms, "request failed");
    } else if status.is_client_error() {
        warn!(%method, path, status = status.as_u16(), latency_ms, "request rejected");
    } else {
        info!(%method, path, status = status.as_u16(), latency_ms, "request completed");
    }
    response
}
