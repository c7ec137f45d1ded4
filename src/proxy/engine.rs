//! Verification engine: bounded concurrent checking of a candidate stream

use crate::cancel::{CancelReason, CancelToken};
use crate::proxy::error::{CheckError, Interrupted};
use crate::proxy::models::{ProxyAddress, Scheme, VerificationResult};
use crate::proxy::parser::AddressParser;
use crate::proxy::probe::{Probe, ProbeClient};
use crate::proxy::verifier::ProxyVerifier;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of candidates verified at once
const DEFAULT_CONCURRENCY: usize = 100;

/// Default "what is my IP" endpoint
const DEFAULT_TARGET: &str = "http://checkip.amazonaws.com";

/// Configuration for the verification engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Endpoint that echoes the caller's IP
    #[serde(rename = "api")]
    pub target: String,
    /// Timeout for each probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Number of candidates verified at once
    pub concurrency: usize,
    /// Schemes raced against every candidate
    pub schemes: Vec<Scheme>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            schemes: Scheme::DEFAULT_RACE.to_vec(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_schemes(mut self, schemes: Vec<Scheme>) -> Self {
        self.schemes = schemes;
        self
    }
}

/// Handle on a streaming run started by [`VerificationEngine::check`]
pub struct Check {
    /// Confirmed proxies in completion order; closes once every worker is done
    pub confirmed: mpsc::Receiver<ProxyAddress>,
    /// Resolves after `confirmed` closes: `Err` if the run was cancelled
    pub finished: oneshot::Receiver<Result<(), CancelReason>>,
}

/// Runs a bounded pool of [`ProxyVerifier`] invocations over a stream of
/// candidate lines.
///
/// Per-candidate failures are logged at debug level and dropped; only
/// cancellation ends a run with an error.
pub struct VerificationEngine<P = ProbeClient> {
    verifier: Arc<ProxyVerifier<P>>,
    concurrency: usize,
}

impl VerificationEngine<ProbeClient> {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create an engine probing through [`ProbeClient`]
    pub fn with_config(config: CheckerConfig) -> Self {
        let probe = ProbeClient::new(config.target.clone(), config.timeout);
        Self::with_probe(probe, &config)
    }
}

impl<P: Probe> VerificationEngine<P> {
    pub fn with_probe(probe: P, config: &CheckerConfig) -> Self {
        let verifier = ProxyVerifier::new(AddressParser::new(), probe, config.schemes.clone());
        Self {
            verifier: Arc::new(verifier),
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start verifying `candidates`; the streaming form.
    ///
    /// At most `concurrency` candidates are in verification at any moment.
    /// Workers stop pulling new candidates as soon as `cancel` fires. The
    /// output channel is buffered to the pool size so a slow consumer only
    /// stalls workers once it is that far behind.
    pub fn check(&self, cancel: &CancelToken, candidates: mpsc::Receiver<String>) -> Check {
        let (confirmed_tx, confirmed) = mpsc::channel(self.concurrency);
        let (finished_tx, finished) = oneshot::channel();
        let verifier = Arc::clone(&self.verifier);
        let concurrency = self.concurrency;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut outcomes = Box::pin(
                ReceiverStream::new(candidates)
                    .take_until(cancel.cancelled())
                    .map(|line| {
                        let verifier = Arc::clone(&verifier);
                        let cancel = cancel.clone();
                        async move {
                            let outcome = verifier.verify(&cancel, &line).await;
                            (line, outcome)
                        }
                    })
                    .buffer_unordered(concurrency),
            );

            let mut live = 0usize;
            while let Some((line, outcome)) = outcomes.next().await {
                match outcome {
                    Ok(address) => {
                        live += 1;
                        if confirmed_tx.send(address).await.is_err() {
                            debug!("result consumer went away, stopping run");
                            break;
                        }
                    }
                    Err(CheckError::Cancelled(_)) => {}
                    Err(err) => debug!(candidate = %line, error = %err, "candidate rejected"),
                }
            }

            drop(outcomes);
            drop(confirmed_tx);

            let status = cancel.reason().map_or(Ok(()), Err);
            match status {
                Ok(()) => info!(live, "verification run finished"),
                Err(reason) => info!(live, %reason, "verification run interrupted"),
            }
            // the caller may only care about the confirmed stream
            let _ = finished_tx.send(status);
        });

        Check {
            confirmed,
            finished,
        }
    }

    /// Drain a full run; the blocking form.
    ///
    /// Returns the confirmed proxies once the input is exhausted and every
    /// in-flight verification is done. If `cancel` fires first, returns
    /// [`Interrupted`] carrying whatever had been confirmed by then.
    pub async fn await_check(
        &self,
        cancel: &CancelToken,
        candidates: mpsc::Receiver<String>,
    ) -> Result<VerificationResult, Interrupted> {
        let Check {
            mut confirmed,
            finished,
        } = self.check(cancel, candidates);
        let mut result = VerificationResult::new();

        loop {
            tokio::select! {
                biased;
                address = confirmed.recv() => match address {
                    Some(address) => {
                        result.insert(address);
                    }
                    None => break,
                },
                reason = cancel.cancelled() => {
                    return Err(Interrupted { reason, partial: result });
                }
            }
        }

        match finished.await {
            Ok(Ok(())) => Ok(result),
            Ok(Err(reason)) => Err(Interrupted {
                reason,
                partial: result,
            }),
            Err(_) => {
                warn!("verification run ended without reporting its status");
                Ok(result)
            }
        }
    }

    /// [`await_check`](Self::await_check) over an in-memory list of lines
    pub async fn await_lines(
        &self,
        cancel: &CancelToken,
        lines: Vec<String>,
    ) -> Result<VerificationResult, Interrupted> {
        self.await_check(cancel, crate::proxy::io::candidates_from(lines))
            .await
    }
}

impl Default for VerificationEngine<ProbeClient> {
    fn default() -> Self {
        Self::new()
    }
}
