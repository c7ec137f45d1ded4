//! Probe requests routed through a candidate proxy

use crate::cancel::CancelToken;
use crate::proxy::error::ProbeError;
use crate::proxy::models::{ProxyAddress, Scheme};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::future::Future;
use std::time::Duration;

/// One verification attempt of a candidate under one scheme.
///
/// Implementations must resolve promptly once `cancel` fires and must
/// bound their own running time.
pub trait Probe: Send + Sync + 'static {
    fn probe(
        &self,
        cancel: &CancelToken,
        address: ProxyAddress,
        scheme: Scheme,
    ) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// Probe that fetches an "echo my IP" endpoint through the proxy.
///
/// The proxy is confirmed only if the endpoint answers 200 and the body
/// contains the proxy's own host, i.e. the outbound IP really changed.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    target: String,
    timeout: Duration,
}

impl ProbeClient {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a reqwest client that sends everything through the proxy
    fn create_client(&self, address: ProxyAddress, scheme: Scheme) -> Result<Client, ProbeError> {
        // `all` so https targets are tunnelled through the proxy as well
        let proxy = ReqwestProxy::all(address.url(scheme)).map_err(ProbeError::Client)?;

        Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(ProbeError::Client)
    }

    async fn request(&self, address: ProxyAddress, scheme: Scheme) -> Result<(), ProbeError> {
        let client = self.create_client(address, scheme)?;

        let response = client.get(&self.target).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Request(e)
            }
        })?;

        if response.status() != StatusCode::OK {
            return Err(ProbeError::Status(response.status()));
        }

        let body = response.text().await.map_err(ProbeError::Body)?;
        if !body.contains(&address.host().to_string()) {
            return Err(ProbeError::Mismatch {
                host: address.host(),
            });
        }

        Ok(())
    }
}

impl Probe for ProbeClient {
    async fn probe(
        &self,
        cancel: &CancelToken,
        address: ProxyAddress,
        scheme: Scheme,
    ) -> Result<(), ProbeError> {
        tokio::select! {
            reason = cancel.cancelled() => Err(ProbeError::Cancelled(reason)),
            outcome = tokio::time::timeout(self.timeout, self.request(address, scheme)) => {
                outcome.unwrap_or(Err(ProbeError::Timeout(self.timeout)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as ServerStatus;
    use axum::Router;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    /// Plain HTTP server acting as a forward proxy that always answers `body`
    async fn spawn_echo_proxy(status: ServerStatus, body: &'static str) -> ProxyAddress {
        let app = Router::new().fallback(move || async move { (status, body) });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        ProxyAddress::new(Ipv4Addr::LOCALHOST, port).unwrap()
    }

    fn client() -> ProbeClient {
        ProbeClient::new("http://probe.test/", Duration::from_secs(5))
    }

    #[test]
    fn test_probe_client_creation() {
        let probe = ProbeClient::new("http://example.com", Duration::from_secs(30));
        assert_eq!(probe.target(), "http://example.com");
        assert_eq!(probe.timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_probe_succeeds_when_host_is_echoed() {
        let proxy = spawn_echo_proxy(ServerStatus::OK, "127.0.0.1\n").await;
        let outcome = client().probe(&CancelToken::new(), proxy, Scheme::Http).await;
        assert!(outcome.is_ok(), "{outcome:?}");
    }

    #[tokio::test]
    async fn test_probe_rejects_identity_mismatch() {
        let proxy = spawn_echo_proxy(ServerStatus::OK, "203.0.113.9").await;
        let outcome = client().probe(&CancelToken::new(), proxy, Scheme::Http).await;
        assert!(matches!(outcome, Err(ProbeError::Mismatch { .. })));
    }

    #[tokio::test]
    async fn test_probe_rejects_non_200_status() {
        let proxy = spawn_echo_proxy(ServerStatus::BAD_GATEWAY, "127.0.0.1").await;
        let outcome = client().probe(&CancelToken::new(), proxy, Scheme::Http).await;
        assert!(matches!(
            outcome,
            Err(ProbeError::Status(StatusCode::BAD_GATEWAY))
        ));
    }

    #[tokio::test]
    async fn test_probe_reports_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let proxy = ProxyAddress::new(Ipv4Addr::LOCALHOST, port).unwrap();
        let outcome = client().probe(&CancelToken::new(), proxy, Scheme::Http).await;
        assert!(matches!(outcome, Err(ProbeError::Request(_))));
    }

    #[tokio::test]
    async fn test_probe_returns_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();

        // accepts the connection but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy = ProxyAddress::new(Ipv4Addr::LOCALHOST, port).unwrap();

        let outcome = client().probe(&cancel, proxy, Scheme::Http).await;
        assert!(matches!(outcome, Err(ProbeError::Cancelled(_))));
    }
}
