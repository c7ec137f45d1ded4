//! End-to-end check of a single candidate line

use crate::cancel::CancelToken;
use crate::proxy::error::{CheckError, ProbeError};
use crate::proxy::models::{ProxyAddress, Scheme};
use crate::proxy::parser::AddressParser;
use crate::proxy::probe::{Probe, ProbeClient};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Parses a candidate and races one probe per scheme against it.
///
/// A candidate does not say which protocol it speaks, so every configured
/// scheme is tried at once and the first success wins. Total latency is
/// bounded by the slowest probe, not the sum.
pub struct ProxyVerifier<P = ProbeClient> {
    parser: AddressParser,
    probe: Arc<P>,
    schemes: Arc<[Scheme]>,
}

impl<P: Probe> ProxyVerifier<P> {
    /// An empty scheme list falls back to [`Scheme::DEFAULT_RACE`]
    pub fn new(parser: AddressParser, probe: P, schemes: Vec<Scheme>) -> Self {
        let schemes = if schemes.is_empty() {
            Scheme::DEFAULT_RACE.to_vec()
        } else {
            schemes
        };

        Self {
            parser,
            probe: Arc::new(probe),
            schemes: schemes.into(),
        }
    }

    pub fn schemes(&self) -> &[Scheme] {
        &self.schemes
    }

    /// Verify one candidate line
    ///
    /// Malformed lines fail before any network call. Otherwise returns the
    /// address as soon as one scheme verifies it; when every scheme fails the
    /// error of whichever probe finished last is returned. Probes still in
    /// flight after the verdict are left to their own timeout.
    pub async fn verify(&self, cancel: &CancelToken, line: &str) -> Result<ProxyAddress, CheckError> {
        let address = self
            .parser
            .parse(line)
            .ok_or_else(|| CheckError::InvalidAddress(line.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<(Scheme, Result<(), ProbeError>)>(self.schemes.len());
        for &scheme in self.schemes.iter() {
            let tx = tx.clone();
            let probe = Arc::clone(&self.probe);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = probe.probe(&cancel, address, scheme).await;
                // capacity covers every scheme; the verifier may be gone already
                let _ = tx.try_send((scheme, outcome));
            });
        }
        drop(tx);

        let mut last_error = None;
        loop {
            tokio::select! {
                biased;
                reason = cancel.cancelled() => return Err(CheckError::Cancelled(reason)),
                received = rx.recv() => match received {
                    Some((scheme, Ok(()))) => {
                        debug!(%address, %scheme, "proxy verified");
                        return Ok(address);
                    }
                    Some((scheme, Err(err))) => {
                        debug!(%address, %scheme, error = %err, "probe failed");
                        last_error = Some(err);
                    }
                    None => break,
                },
            }
        }

        match last_error {
            Some(source) => Err(CheckError::Probe { address, source }),
            None => Err(CheckError::Unverified(address)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Behavior {
        Succeed,
        Fail,
        SucceedAfter(Duration),
        FailAfter(Duration),
        /// never answers; only cancellation ends it
        Hang,
    }

    /// Probe following a script keyed by (address, scheme); unknown
    /// combinations fail immediately.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        script: HashMap<(ProxyAddress, Scheme), Behavior>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        /// Shared count of probe invocations
        pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        pub(crate) fn with(mut self, line: &str, scheme: Scheme, behavior: Behavior) -> Self {
            let address = AddressParser::new().parse(line).unwrap();
            self.script.insert((address, scheme), behavior);
            self
        }
    }

    impl Probe for ScriptedProbe {
        async fn probe(
            &self,
            cancel: &CancelToken,
            address: ProxyAddress,
            scheme: Scheme,
        ) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .script
                .get(&(address, scheme))
                .copied()
                .unwrap_or(Behavior::Fail);

            let work = async move {
                match behavior {
                    Behavior::Succeed => Ok(()),
                    Behavior::Fail => Err(ProbeError::Mismatch { host: address.host() }),
                    Behavior::SucceedAfter(delay) => {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    }
                    Behavior::FailAfter(delay) => {
                        tokio::time::sleep(delay).await;
                        Err(ProbeError::Timeout(delay))
                    }
                    Behavior::Hang => std::future::pending().await,
                }
            };

            tokio::select! {
                reason = cancel.cancelled() => Err(ProbeError::Cancelled(reason)),
                outcome = work => outcome,
            }
        }
    }

    fn verifier(probe: ScriptedProbe) -> ProxyVerifier<ScriptedProbe> {
        ProxyVerifier::new(AddressParser::new(), probe, Scheme::DEFAULT_RACE.to_vec())
    }

    #[tokio::test]
    async fn test_malformed_line_never_probes() {
        let verifier = verifier(ScriptedProbe::default());

        let outcome = verifier.verify(&CancelToken::new(), "not-a-proxy").await;

        assert!(matches!(outcome, Err(CheckError::InvalidAddress(_))));
        assert_eq!(verifier.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_both_schemes_are_probed() {
        let verifier = verifier(ScriptedProbe::default());

        let outcome = verifier.verify(&CancelToken::new(), "10.0.0.5:8080").await;

        assert!(matches!(outcome, Err(CheckError::Probe { .. })));
        assert_eq!(verifier.probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_socks5_success_alone_verifies() {
        let probe = ScriptedProbe::default().with("10.0.0.1:1080", Scheme::Socks5, Behavior::Succeed);
        let verifier = verifier(probe);

        let address = verifier.verify(&CancelToken::new(), "10.0.0.1:1080").await.unwrap();

        assert_eq!(address, ProxyAddress::new(Ipv4Addr::new(10, 0, 0, 1), 1080).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_does_not_wait_for_hanging_scheme() {
        let probe = ScriptedProbe::default()
            .with("10.0.0.1:3128", Scheme::Http, Behavior::SucceedAfter(Duration::from_millis(100)))
            .with("10.0.0.1:3128", Scheme::Socks5, Behavior::Hang);
        let verifier = verifier(probe);

        let started = tokio::time::Instant::now();
        let outcome = verifier.verify(&CancelToken::new(), "10.0.0.1:3128").await;

        assert!(outcome.is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_of_last_finisher_is_returned() {
        let probe = ScriptedProbe::default()
            .with("10.0.0.1:3128", Scheme::Http, Behavior::FailAfter(Duration::from_millis(10)))
            .with("10.0.0.1:3128", Scheme::Socks5, Behavior::FailAfter(Duration::from_millis(500)));
        let verifier = verifier(probe);

        let outcome = verifier.verify(&CancelToken::new(), "10.0.0.1:3128").await;

        match outcome {
            Err(CheckError::Probe {
                source: ProbeError::Timeout(delay),
                ..
            }) => assert_eq!(delay, Duration::from_millis(500)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_abandons_probes() {
        let probe = ScriptedProbe::default()
            .with("10.0.0.1:3128", Scheme::Http, Behavior::Hang)
            .with("10.0.0.1:3128", Scheme::Socks5, Behavior::Hang);
        let verifier = verifier(probe);
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = verifier.verify(&cancel, "10.0.0.1:3128").await;
        assert!(matches!(outcome, Err(CheckError::Cancelled(CancelReason::Canceled))));
    }

    #[test]
    fn test_empty_scheme_list_uses_default_race() {
        let verifier = ProxyVerifier::new(AddressParser::new(), ScriptedProbe::default(), vec![]);
        assert_eq!(verifier.schemes(), &Scheme::DEFAULT_RACE);
    }
}
