//! Rate Limiting Implementation
//!
//! Token bucket per client IP in front of the check endpoints, with a
//! periodic sweep that forgets clients gone quiet.

use crate::cancel::CancelToken;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// One token is added back per interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Bucket capacity
    pub burst: u32,
    /// How often idle clients are swept
    #[serde(with = "humantime_serde")]
    pub sweep_period: Duration,
    /// Clients unseen for longer than this are forgotten
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            burst: 1,
            sweep_period: Duration::from_secs(60),
            stale_after: Duration::from_secs(180),
        }
    }
}

/// Token bucket state of one client
#[derive(Debug, Clone)]
pub struct ClientBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_consume(&mut self, interval: Duration, now: Instant) -> bool {
        self.refill(interval, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, interval: Duration, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        if elapsed > 0.0 {
            let tokens_to_add = elapsed / interval.as_secs_f64();
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

/// Per-client admission control.
///
/// Requests and the sweep share one async lock over the bucket map, so a
/// bucket is never observed half-deleted.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Mutex<HashMap<IpAddr, ClientBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request from `client`
    pub async fn check(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let bucket = clients
            .entry(client)
            .or_insert_with(|| ClientBucket::new(self.config.burst, now));

        // rejected requests still count as activity
        bucket.last_seen = now;
        let allowed = bucket.try_consume(self.config.interval, now);

        if !allowed {
            debug!(%client, "rate limit exceeded");
        }
        allowed
    }

    /// Drop clients idle for longer than `stale_after`; returns how many went
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.config.stale_after;

        let mut clients = self.clients.lock().await;
        let initial_count = clients.len();
        clients.retain(|_, bucket| now.duration_since(bucket.last_seen) <= stale_after);

        let removed_count = initial_count - clients.len();
        if removed_count > 0 {
            debug!("Cleaned up {} idle rate limit entries", removed_count);
        }
        removed_count
    }

    /// Sweep every `sweep_period` until `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancelToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.config.sweep_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            let stopped = cancel.cancelled();
            tokio::pin!(stopped);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        limiter.sweep().await;
                    }
                }
            }
            debug!("rate limit sweeper stopped");
        })
    }

    /// Number of clients currently tracked
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Middleware admitting requests by peer IP
pub async fn limit_by_peer(
    State(limiter): State<Arc<RateLimiter>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ConnectInfo(peer)) = peer else {
        error!("request without peer address reached the rate limiter");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    if !limiter.check(peer.ip()).await {
        warn!(client = %peer.ip(), path = %request.uri().path(), "too many requests");
        return (StatusCode::TOO_MANY_REQUESTS, "too many requests").into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::{middleware, Router};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn client(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_request_per_interval() {
        let limiter = limiter();

        assert!(limiter.check(client(1)).await);
        assert!(!limiter.check(client(1)).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check(client(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_limited_independently() {
        let limiter = limiter();

        assert!(limiter.check(client(1)).await);
        assert!(limiter.check(client(2)).await);
        assert!(!limiter.check(client(1)).await);
        assert_eq!(limiter.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_allows_that_many_in_a_row() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 3,
            ..RateLimitConfig::default()
        });

        for _ in 0..3 {
            assert!(limiter.check(client(1)).await);
        }
        assert!(!limiter.check(client(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_clients() {
        let limiter = limiter();
        limiter.check(client(1)).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.check(client(2)).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.len().await, 1);

        // the evicted client starts over with a full bucket
        assert!(limiter.check(client(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_client_is_admitted_again() {
        let limiter = limiter();
        assert!(limiter.check(client(1)).await);
        assert!(!limiter.check(client(1)).await);

        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert!(limiter.is_empty().await);
        assert!(limiter.check(client(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically_and_stops() {
        let limiter = Arc::new(limiter());
        let cancel = CancelToken::new();
        let sweeper = limiter.spawn_sweeper(cancel.clone());

        limiter.check(client(1)).await;
        // stale after 3m, swept at the 4m tick
        tokio::time::sleep(Duration::from_secs(241)).await;
        assert!(limiter.is_empty().await);

        cancel.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_middleware_rejects_with_429() {
        let limiter = Arc::new(limiter());
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, limit_by_peer));

        let request = || {
            let mut request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 4000))));
            request
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_middleware_without_peer_is_500() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(Arc::new(limiter()), limit_by_peer));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
