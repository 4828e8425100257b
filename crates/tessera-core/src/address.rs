//! Network addresses and transport types.
//!
//! An `Address` is the identity key for everything in the peer group:
//! peers, bans and seeds are all looked up by it. It is written as
//! `host:port` on disk and in logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network endpoint of a peer (clearnet host, onion or i2p destination).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    host: String,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),
    #[error("invalid port in address {0:?}")]
    InvalidPort(String),
    #[error("empty host in address {0:?}")]
    EmptyHost(String),
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

    /// Onion and i2p hosts carry their transport in the host name.
    pub fn transport_type(&self) -> TransportType {
        if self.host.ends_with(".onion") {
            TransportType::Tor
        } else if self.host.ends_with(".i2p") {
            TransportType::I2p
        } else {
            TransportType::Clear
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Transport a node runs on. Each transport gets its own peer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Tor,
    I2p,
    Clear,
}

impl TransportType {
    /// Lowercase name, used to qualify per-transport store files.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Tor => "tor",
            TransportType::I2p => "i2p",
            TransportType::Clear => "clear",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
