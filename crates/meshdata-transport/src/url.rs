//! `scheme://host:port` urls.

use std::fmt;

use crate::{Result, TransportError};

/// A parsed transport url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportUrl {
    scheme: String,
    host: String,
    port: u16,
}

impl TransportUrl {
    /// Builds a url from its parts.
    #[must_use]
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        }
    }

    /// Parses `scheme://host:port`.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        if scheme.is_empty() || host.is_empty() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        Ok(Self::new(scheme, host, port))
    }

    /// Parses a url and checks its scheme.
    pub fn parse_with_scheme(url: &str, expected: &'static str) -> Result<Self> {
        let parsed = Self::parse(url)?;
        if parsed.scheme != expected {
            return Err(TransportError::UnsupportedScheme {
                expected,
                found: parsed.scheme,
            });
        }
        Ok(parsed)
    }

    /// Returns the scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for TransportUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let url = TransportUrl::parse("tcp://127.0.0.1:7400").unwrap();
        assert_eq!(url.scheme(), "tcp");
        assert_eq!(url.authority(), "127.0.0.1:7400");
        assert_eq!(url.to_string(), "tcp://127.0.0.1:7400");
    }

    #[test]
    fn malformed_urls() {
        for bad in ["127.0.0.1:1", "tcp://host", "tcp://:1", "tcp://h:port", "://h:1"] {
            assert!(TransportUrl::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn scheme_is_checked() {
        let err = TransportUrl::parse_with_scheme("mem://localhost:1", "tcp").unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme { .. }));
    }
}
