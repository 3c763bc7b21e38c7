//! Network enum bridging the protocol's three supported networks to
//! `bitcoin::Network`.

use serde::{Deserialize, Serialize};

use crate::error::{OpnetTxError, Result};

/// The three networks the offline-state wire format and builders support.
///
/// Kept distinct from `bitcoin::Network` (which also has `Signet`) because
/// the serializable state envelope (spec §6) enumerates exactly these three
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    pub fn from_bitcoin(network: bitcoin::Network) -> Result<Self> {
        match network {
            bitcoin::Network::Bitcoin => Ok(Network::Mainnet),
            bitcoin::Network::Testnet => Ok(Network::Testnet),
            bitcoin::Network::Regtest => Ok(Network::Regtest),
            other => Err(OpnetTxError::InvalidNetwork {
                expected: "mainnet|testnet|regtest".to_string(),
                actual: format!("{other:?}"),
            }),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = OpnetTxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(OpnetTxError::InvalidNetwork {
                expected: "mainnet|testnet|regtest".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}
