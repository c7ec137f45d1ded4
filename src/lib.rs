//! Proxy Checker - Proxy verification engine
//!
//! Verifies IP:PORT proxy candidates by routing a probe request through each
//! one and confirming that the outbound IP becomes the proxy's own address.
//! The same engine sits behind a line-mode CLI, an HTTP API with a web form,
//! and a Telegram bot.

pub mod bot;
pub mod cancel;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod server;

pub use cancel::{CancelReason, CancelToken};
pub use config::Config;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
