//! Proxy module for parsing and verifying proxies
//!
//! This module provides functionality for:
//! - Extracting IP:PORT candidates from free-form lines
//! - Probing a candidate through several proxy schemes at once
//! - Verifying candidate streams with a bounded pool of workers
//! - Reading candidates from and writing results to files or the terminal

pub mod engine;
pub mod error;
pub mod io;
pub mod models;
pub mod parser;
pub mod probe;
pub mod verifier;

pub use engine::{Check, CheckerConfig, VerificationEngine};
pub use error::{CheckError, Interrupted, ProbeError};
pub use io::{read_lines, LineSink, LineSource};
pub use models::{ProxyAddress, Scheme, VerificationResult};
pub use parser::AddressParser;
pub use probe::{Probe, ProbeClient};
pub use verifier::ProxyVerifier;
