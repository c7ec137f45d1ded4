//! Application configuration
//!
//! Defaults, overlaid by an optional TOML file, overlaid by environment
//! variables, then validated as a whole.

use crate::proxy::engine::CheckerConfig;
use crate::server::rate_limit::RateLimitConfig;
use crate::Result;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment whose log output is meant for humans
pub const LOCAL_ENV: &str = "local";

/// Environment variable pointing at a config file when `--config` is absent
pub const CONFIG_PATH_VAR: &str = "CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `local`, `dev` or `prod`
    pub env: String,
    pub verbose: bool,
    pub http_server: HttpServerConfig,
    pub proxy_checker: CheckerConfig,
    pub bot: BotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: LOCAL_ENV.to_string(),
            verbose: false,
            http_server: HttpServerConfig::default(),
            proxy_checker: CheckerConfig::default(),
            bot: BotConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub address: String,
    /// Deadline of a single HTTP-triggered verification run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Request body limit in bytes
    pub max_request_size: usize,
    /// Most candidate lines accepted per request
    pub max_check_lines: usize,
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            max_request_size: 5 * 1024 * 1024,
            max_check_lines: 100,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub api_token: Option<String>,
    pub api_url: String,
    /// Long polling timeout passed to `getUpdates`
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_url: "https://api.telegram.org".to_string(),
            poll_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load the full configuration.
    ///
    /// `path` falls back to `$CONFIG_PATH`; a path that is given but missing
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_PATH_VAR);
        let path = path.or(from_env.as_deref().map(Path::new));

        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Config file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("ENV") {
            self.env = env;
        }

        if let Some(verbose) = lookup("VERBOSE") {
            self.verbose = verbose
                .parse::<bool>()
                .with_context(|| format!("Invalid VERBOSE: {}", verbose))?;
        }

        if let Some(api) = lookup("API") {
            self.proxy_checker.target = api;
        }

        if let Some(timeout) = lookup("TIMEOUT") {
            self.proxy_checker.timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid TIMEOUT: {}", timeout))?;
        }

        if let Some(concurrency) = lookup("CONCURRENCY") {
            self.proxy_checker.concurrency = concurrency
                .parse::<usize>()
                .with_context(|| format!("Invalid CONCURRENCY: {}", concurrency))?;
        }

        if let Some(address) = lookup("HTTP_ADDRESS") {
            self.http_server.address = address;
        }

        if let Some(token) = lookup("TELEGRAM_API_TOKEN") {
            self.bot.api_token = Some(token).filter(|t| !t.is_empty());
        }

        Ok(())
    }

    pub fn is_local(&self) -> bool {
        self.env == LOCAL_ENV
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_checker_config()
            .context("proxy_checker configuration validation failed")?;
        self.validate_http_server_config()
            .context("http_server configuration validation failed")?;
        Ok(())
    }

    fn validate_checker_config(&self) -> Result<()> {
        let checker = &self.proxy_checker;

        if checker.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }
        if checker.timeout.is_zero() {
            bail!("timeout must be greater than 0");
        }
        if checker.schemes.is_empty() {
            bail!("at least one scheme must be configured");
        }
        reqwest::Url::parse(&checker.target)
            .with_context(|| format!("api is not a valid URL: {}", checker.target))?;

        Ok(())
    }

    fn validate_http_server_config(&self) -> Result<()> {
        let server = &self.http_server;

        if server.timeout.is_zero() {
            bail!("timeout must be greater than 0");
        }
        if server.max_check_lines == 0 {
            bail!("max_check_lines must be greater than 0");
        }
        if server.max_request_size == 0 {
            bail!("max_request_size must be greater than 0");
        }
        if server.rate_limit.burst == 0 {
            bail!("rate_limit.burst must be greater than 0");
        }
        if server.rate_limit.interval.is_zero() {
            bail!("rate_limit.interval must be greater than 0");
        }
        if server.rate_limit.sweep_period.is_zero() {
            bail!("rate_limit.sweep_period must be greater than 0");
        }
        if server.rate_limit.stale_after.is_zero() {
            bail!("rate_limit.stale_after must be greater than 0");
        }

        Ok(())
    }
}
