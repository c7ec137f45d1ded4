//! Errors produced while verifying candidates

use crate::cancel::CancelReason;
use crate::proxy::models::{ProxyAddress, VerificationResult};
use reqwest::StatusCode;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Why a single probe did not verify its candidate
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("building client: {0}")]
    Client(reqwest::Error),
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("non-200 response: {0}")]
    Status(StatusCode),
    #[error("reading response body: {0}")]
    Body(reqwest::Error),
    #[error("proxy IP mismatch: {host} not echoed back")]
    Mismatch { host: Ipv4Addr },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Cancelled(#[from] CancelReason),
}

/// Why a candidate line was not confirmed live
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid proxy url: {0}")]
    InvalidAddress(String),
    #[error("{address}: {source}")]
    Probe {
        address: ProxyAddress,
        #[source]
        source: ProbeError,
    },
    #[error("{0}: no probe reported back")]
    Unverified(ProxyAddress),
    #[error(transparent)]
    Cancelled(#[from] CancelReason),
}

/// A run that stopped on cancellation, with whatever it had confirmed
#[derive(Debug, Error)]
#[error("verification interrupted after {} live proxies: {reason}", .partial.len())]
pub struct Interrupted {
    pub reason: CancelReason,
    pub partial: VerificationResult,
}
