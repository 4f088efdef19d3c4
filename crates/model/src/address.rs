use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A `host:port` network address identifying a node endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HostPort {
    /// Hostname or IP address.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl HostPort {
    /// Creates a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidAddress {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            // [ipv6]:port
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid("expected [host]:port"))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 1 and 65535"))?;
        if port == 0 {
            return Err(invalid("port must be a number between 1 and 65535"));
        }

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_host_port() {
        let address: HostPort = "localhost:9410".parse().unwrap();
        assert_eq!(address, HostPort::new("localhost", 9410));
        assert_eq!(address.to_string(), "localhost:9410");
    }

    #[test]
    fn test_parse_ipv6() {
        let address: HostPort = "[::1]:9410".parse().unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.to_string(), "[::1]:9410");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        assert_matches!("localhost".parse::<HostPort>(), Err(Error::InvalidAddress { .. }));
        assert_matches!(":9410".parse::<HostPort>(), Err(Error::InvalidAddress { .. }));
        assert_matches!("localhost:0".parse::<HostPort>(), Err(Error::InvalidAddress { .. }));
        assert_matches!("localhost:70000".parse::<HostPort>(), Err(Error::InvalidAddress { .. }));
    }
}
