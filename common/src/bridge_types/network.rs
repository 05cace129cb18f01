//! Network enum and related functionality
//!
//! This module defines the `Network` enum for the two sides of the bridge,
//! along with conversions between the bridge's network ids and names.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Networks known to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Ethereum L1 (Sepolia testnet), bridge network id 0
    Sepolia,
    /// Katana rollup (Tatara testnet), bridge network id 29
    Katana,
}

impl Network {
    /// Bridge network id used by the unified bridge contracts
    pub fn id(&self) -> u32 {
        match self {
            Network::Sepolia => 0,
            Network::Katana => 29,
        }
    }

    /// Convert from bridge network id to Network
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Network::Sepolia),
            29 => Some(Network::Katana),
            _ => None,
        }
    }

    /// Get string representation of the network
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Sepolia => "sepolia",
            Network::Katana => "katana",
        }
    }

    /// L1 deposits are flagged as mainnet in the claim's global index
    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Sepolia)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sepolia" | "ethereum" => Ok(Self::Sepolia),
            "katana" | "tatara" => Ok(Self::Katana),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(Self::from_id)
                .ok_or_else(|| format!("Unknown network: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_conversions() {
        assert_eq!(Network::Sepolia.id(), 0);
        assert_eq!(Network::Katana.id(), 29);
        assert_eq!(Network::from_id(29), Some(Network::Katana));
        assert_eq!(Network::from_id(1), None);

        assert_eq!("KATANA".parse::<Network>(), Ok(Network::Katana));
        assert_eq!("0".parse::<Network>(), Ok(Network::Sepolia));
        assert!("polygon".parse::<Network>().is_err());

        assert_eq!(Network::Katana.to_string(), "katana");
    }

    #[test]
    fn test_mainnet_flag() {
        assert!(Network::Sepolia.is_mainnet());
        assert!(!Network::Katana.is_mainnet());
    }
}
