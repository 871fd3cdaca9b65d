//! Instrument resource addresses.
//!
//! Two forms are understood:
//! * `GPIB0::28::INSTR` - VISA style, the adapter's serial port comes from configuration.
//! * `prologix::/dev/ttyUSB0::28` - adapter port and primary address in one string.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default GPIB primary address of the SMY02.
pub const DEFAULT_PRIMARY_ADDRESS: u8 = 28;

/// Highest valid GPIB primary address.
pub const MAX_PRIMARY_ADDRESS: u8 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address `{0}` is not of the form GPIB<board>::<primary>::INSTR or prologix::<port>::<primary>")]
    Malformed(String),
    #[error("GPIB primary address {0} is out of range (0 - 30)")]
    PrimaryOutOfRange(u8),
}

/// A parsed instrument address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    /// VISA style address. The adapter port is resolved by the connector.
    Gpib { board: u8, primary: u8 },
    /// Adapter serial port plus GPIB primary address.
    Prologix { port: String, primary: u8 },
}

impl ResourceAddress {
    /// The GPIB primary address of the instrument.
    pub fn primary(&self) -> u8 {
        match self {
            ResourceAddress::Gpib { primary, .. } | ResourceAddress::Prologix { primary, .. } => {
                *primary
            }
        }
    }

    /// The adapter port, if the address names one.
    pub fn port(&self) -> Option<&str> {
        match self {
            ResourceAddress::Gpib { .. } => None,
            ResourceAddress::Prologix { port, .. } => Some(port),
        }
    }

    /// Pin a VISA style address to a concrete adapter port.
    pub fn with_port(self, port: impl Into<String>) -> Self {
        ResourceAddress::Prologix {
            port: port.into(),
            primary: self.primary(),
        }
    }

    fn parse_primary(value: &str, original: &str) -> Result<u8, AddressError> {
        let primary: u8 = value
            .trim()
            .parse()
            .map_err(|_| AddressError::Malformed(original.to_string()))?;
        if primary > MAX_PRIMARY_ADDRESS {
            return Err(AddressError::PrimaryOutOfRange(primary));
        }
        Ok(primary)
    }
}

impl Default for ResourceAddress {
    fn default() -> Self {
        ResourceAddress::Gpib {
            board: 0,
            primary: DEFAULT_PRIMARY_ADDRESS,
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressError;

    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let splits: Vec<&str> = addr.trim().split("::").collect();
        let malformed = || AddressError::Malformed(addr.to_string());

        let head = splits.first().map(|s| s.to_lowercase()).unwrap_or_default();
        if head == "prologix" {
            // prologix::/dev/ttyUSB0::28
            if splits.len() != 3 || splits[1].is_empty() {
                return Err(malformed());
            }
            let primary = Self::parse_primary(splits[2], addr)?;
            Ok(ResourceAddress::Prologix {
                port: splits[1].to_string(),
                primary,
            })
        } else if let Some(board) = head.strip_prefix("gpib") {
            // GPIB0::28::INSTR, the INSTR suffix is optional.
            if splits.len() < 2 || splits.len() > 3 {
                return Err(malformed());
            }
            if splits.len() == 3 && !splits[2].eq_ignore_ascii_case("instr") {
                return Err(malformed());
            }
            let board: u8 = if board.is_empty() {
                0
            } else {
                board.parse().map_err(|_| malformed())?
            };
            let primary = Self::parse_primary(splits[1], addr)?;
            Ok(ResourceAddress::Gpib { board, primary })
        } else {
            Err(malformed())
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Gpib { board, primary } => {
                write!(f, "GPIB{}::{}::INSTR", board, primary)
            }
            ResourceAddress::Prologix { port, primary } => {
                write!(f, "prologix::{}::{}", port, primary)
            }
        }
    }
}
