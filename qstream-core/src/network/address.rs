//! Host address: `host[:port]` parsing and display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Port the streaming host listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 3308;

/// Network location of a streaming host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL for this host.
    pub fn ws_url(&self) -> String {
        if self.host.contains(':') {
            format!("ws://[{}]:{}", self.host, self.port)
        } else {
            format!("ws://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = StreamError;

    /// Parses `host`, `host:port` or `[v6]:port`. A bare host gets
    /// [`DEFAULT_PORT`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || StreamError::InvalidAddress(s.to_string());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else if s.matches(':').count() > 1 {
            // Unbracketed IPv6 literal, no port.
            (s, None)
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr: Address = "192.168.0.1:4000".parse().unwrap();
        assert_eq!(addr.host(), "192.168.0.1");
        assert_eq!(addr.port(), 4000);
        assert_eq!(addr.ws_url(), "ws://192.168.0.1:4000");
    }

    #[test]
    fn bare_host_gets_default_port() {
        let addr: Address = "quest.local".parse().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
        assert_eq!(addr.to_string(), "quest.local:3308");
    }

    #[test]
    fn ipv6_forms() {
        let addr: Address = "[::1]:9000".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.ws_url(), "ws://[::1]:9000");

        let addr: Address = "fe80::1".parse().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("host:notaport".parse::<Address>().is_err());
        assert!("host:70000".parse::<Address>().is_err());
        assert!("[::1]x".parse::<Address>().is_err());
    }
}
