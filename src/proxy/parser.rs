//! Address parser for pulling an IP:PORT out of a candidate line

use crate::proxy::models::ProxyAddress;
use regex::{Captures, Regex};
use std::net::Ipv4Addr;

/// Four dot-separated octets, a colon, a 1-5 digit port, anywhere in the line
const ADDRESS_PATTERN: &str = r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3}):(\d{1,5})\b";

/// Extracts proxy addresses from free-form text.
///
/// Compile once at startup and hand clones to whoever needs one; the
/// compiled pattern is shared between clones.
#[derive(Debug, Clone)]
pub struct AddressParser {
    pattern: Regex,
}

impl AddressParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(ADDRESS_PATTERN).expect("Invalid IP:PORT regex"),
        }
    }

    /// Parse a single candidate line
    ///
    /// The address may be surrounded by any text, e.g. `http://1.2.3.4:80`,
    /// `1.2.3.4:80 # fast` or an HTML table cell. The first embedded address
    /// with valid octets and a port in 1..=65535 wins. Leading zeros are
    /// accepted and dropped, so `010.0.0.1:080` becomes `10.0.0.1:80`.
    pub fn parse(&self, line: &str) -> Option<ProxyAddress> {
        self.pattern
            .captures_iter(line)
            .find_map(|caps| Self::address_from(&caps))
    }

    fn address_from(caps: &Captures<'_>) -> Option<ProxyAddress> {
        let mut octets = [0u8; 4];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = caps.get(i + 1)?.as_str().parse().ok()?;
        }
        let port: u16 = caps.get(5)?.as_str().parse().ok()?;

        ProxyAddress::new(Ipv4Addr::from(octets), port)
    }
}

impl Default for AddressParser {
    fn default() -> Self {
        Self::new()
    }
}
