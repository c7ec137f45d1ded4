//! HTTP front door: web form, JSON API and health check

pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod render;
pub mod types;

pub use handlers::AppState;
pub use rate_limit::{RateLimitConfig, RateLimiter};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::proxy::engine::VerificationEngine;
use crate::proxy::probe::Probe;
use crate::Result;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Build the application router.
///
/// Both check endpoints sit behind the per-client rate limiter; every route
/// is logged and subject to the body size limit.
pub fn router<P: Probe>(state: AppState<P>, limiter: Arc<RateLimiter>, max_request_size: usize) -> Router {
    let limited = Router::new()
        .route("/check", post(handlers::check_form::<P>))
        .route("/api/v1/check", post(handlers::check_api::<P>))
        .route_layer(axum::middleware::from_fn_with_state(limiter, rate_limit::limit_by_peer));

    Router::new()
        .route("/", get(handlers::form_page))
        .route("/healthz", get(handlers::healthz))
        .merge(limited)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(axum::middleware::from_fn(middleware::log_request))
}

/// Serve until `shutdown` fires, then drain in-flight requests
pub async fn serve(config: &Config, shutdown: CancelToken) -> Result<()> {
    let server_config = &config.http_server;

    let engine = Arc::new(VerificationEngine::with_config(config.proxy_checker.clone()));
    let limiter = Arc::new(RateLimiter::new(server_config.rate_limit.clone()));
    let sweeper = limiter.spawn_sweeper(shutdown.clone());

    let state = AppState::new(engine, server_config, shutdown.clone());
    let app = router(state, limiter, server_config.max_request_size);

    let listener = TcpListener::bind(&server_config.address)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", server_config.address))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    info!(address = %local_addr, env = %config.env, "HTTP server listening");
    if config.is_local() {
        info!("open http://{} in your browser", local_addr);
    }

    let stopped = shutdown.cancelled();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let reason = stopped.await;
            info!(%reason, "HTTP server shutting down");
        })
        .await
        .context("HTTP server error")?;

    sweeper.await.context("rate limit sweeper panicked")?;
    info!("HTTP server stopped");
    Ok(())
}
