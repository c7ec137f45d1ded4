//! Request logging middleware

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Log every request once it completes, tagged with a fresh request id
pub async fn log_request(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let started = Instant::now();
        let response = next.run(request).await;

        info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        response
    }
    .instrument(span)
    .await
}
