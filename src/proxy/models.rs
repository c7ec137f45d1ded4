//! Proxy data models

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Proxy protocol a probe uses to address the candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    Socks5,
}

impl Scheme {
    /// Schemes raced against every candidate unless configured otherwise
    pub const DEFAULT_RACE: [Scheme; 2] = [Scheme::Http, Scheme::Socks5];
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
            Scheme::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for Scheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "socks5" => Ok(Scheme::Socks5),
            _ => Err(anyhow::anyhow!(
                "Invalid proxy scheme: {}. Use: http, https, socks5",
                s
            )),
        }
    }
}

/// A validated proxy endpoint: dotted-quad IPv4 host and a non-zero port.
///
/// The `Display` form is canonical and is used both for dialing and for
/// reporting results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyAddress {
    host: Ipv4Addr,
    port: u16,
}

impl ProxyAddress {
    /// Returns `None` for port 0
    pub fn new(host: Ipv4Addr, port: u16) -> Option<Self> {
        (port != 0).then_some(Self { host, port })
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Proxy URL for the given scheme, e.g. `socks5://10.0.0.1:1080`
    pub fn url(&self, scheme: Scheme) -> String {
        format!("{}://{}", scheme, self)
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Serialize for ProxyAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Proxies confirmed live during one verification run.
///
/// Insertion order follows completion order; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VerificationResult {
    addresses: Vec<ProxyAddress>,
    #[serde(skip)]
    seen: HashSet<ProxyAddress>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed proxy. Returns false if it was already present.
    pub fn insert(&mut self, address: ProxyAddress) -> bool {
        if !self.seen.insert(address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    pub fn contains(&self, address: &ProxyAddress) -> bool {
        self.seen.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyAddress> {
        self.addresses.iter()
    }

    pub fn into_vec(self) -> Vec<ProxyAddress> {
        self.addresses
    }
}

impl FromIterator<ProxyAddress> for VerificationResult {
    fn from_iter<I: IntoIterator<Item = ProxyAddress>>(iter: I) -> Self {
        let mut result = Self::new();
        for address in iter {
            result.insert(address);
        }
        result
    }
}
