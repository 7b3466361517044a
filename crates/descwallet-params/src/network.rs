//! Bitcoin network definitions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    #[serde(alias = "bitcoin")]
    Mainnet,
    /// Testnet
    Testnet,
    /// Signet
    Signet,
    /// Regtest (local development)
    Regtest,
}

impl NetworkType {
    /// All supported networks
    pub const ALL: [NetworkType; 4] = [
        NetworkType::Mainnet,
        NetworkType::Testnet,
        NetworkType::Signet,
        NetworkType::Regtest,
    ];

    /// Lower-case network name
    pub const fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Signet => "signet",
            NetworkType::Regtest => "regtest",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "main" => Ok(NetworkType::Mainnet),
            "testnet" | "test" => Ok(NetworkType::Testnet),
            "signet" => Ok(NetworkType::Signet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// BIP-32 serialisation version bytes for one network family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedKeyVersion {
    /// Version bytes of serialised extended private keys
    pub private: [u8; 4],
    /// Version bytes of serialised extended public keys
    pub public: [u8; 4],
    /// Base58 prefix of private keys (`xprv` / `tprv`)
    pub private_prefix: &'static str,
    /// Base58 prefix of public keys (`xpub` / `tpub`)
    pub public_prefix: &'static str,
}

const MAINNET_KEY_VERSION: ExtendedKeyVersion = ExtendedKeyVersion {
    private: [0x04, 0x88, 0xAD, 0xE4],
    public: [0x04, 0x88, 0xB2, 0x1E],
    private_prefix: "xprv",
    public_prefix: "xpub",
};

const TEST_KEY_VERSION: ExtendedKeyVersion = ExtendedKeyVersion {
    private: [0x04, 0x35, 0x83, 0x94],
    public: [0x04, 0x35, 0x87, 0xCF],
    private_prefix: "tprv",
    public_prefix: "tpub",
};

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Coin type (BIP-44)
    pub coin_type: u32,
    /// Bech32 human readable part for segwit addresses
    pub bech32_hrp: &'static str,
    /// Extended key version bytes
    pub key_version: ExtendedKeyVersion,
    /// Default Electrum TCP port
    pub electrum_port: u16,
    /// P2P port
    pub p2p_port: u16,
}

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "mainnet",
            coin_type: 0,
            bech32_hrp: "bc",
            key_version: MAINNET_KEY_VERSION,
            electrum_port: 50001,
            p2p_port: 8333,
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            coin_type: 1,
            bech32_hrp: "tb",
            key_version: TEST_KEY_VERSION,
            electrum_port: 60001,
            p2p_port: 18333,
        }
    }

    /// Get signet parameters
    pub const fn signet() -> Self {
        Self {
            network_type: NetworkType::Signet,
            name: "signet",
            coin_type: 1,
            bech32_hrp: "tb",
            key_version: TEST_KEY_VERSION,
            electrum_port: 60601,
            p2p_port: 38333,
        }
    }

    /// Get regtest parameters
    pub const fn regtest() -> Self {
        Self {
            network_type: NetworkType::Regtest,
            name: "regtest",
            coin_type: 1,
            bech32_hrp: "bcrt",
            key_version: TEST_KEY_VERSION,
            electrum_port: 60401,
            p2p_port: 18444,
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Signet => Self::signet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }

    /// Whether this network uses mainnet key and address encodings
    pub const fn is_mainnet(&self) -> bool {
        matches!(self.network_type, NetworkType::Mainnet)
    }

    /// The matching `bitcoin` crate network
    pub const fn bitcoin_network(&self) -> bitcoin::Network {
        match self.network_type {
            NetworkType::Mainnet => bitcoin::Network::Bitcoin,
            NetworkType::Testnet => bitcoin::Network::Testnet,
            NetworkType::Signet => bitcoin::Network::Signet,
            NetworkType::Regtest => bitcoin::Network::Regtest,
        }
    }

    /// Resolve the key family from serialised version bytes
    pub fn key_version_is_mainnet(version: [u8; 4]) -> Result<bool> {
        if version == MAINNET_KEY_VERSION.private || version == MAINNET_KEY_VERSION.public {
            Ok(true)
        } else if version == TEST_KEY_VERSION.private || version == TEST_KEY_VERSION.public {
            Ok(false)
        } else {
            Err(Error::UnknownKeyVersion(version))
        }
    }
}

impl From<NetworkType> for Network {
    fn from(network_type: NetworkType) -> Self {
        Self::from_type(network_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_params() {
        let net = Network::mainnet();
        assert_eq!(net.network_type, NetworkType::Mainnet);
        assert_eq!(net.coin_type, 0);
        assert_eq!(net.key_version.private_prefix, "xprv");
        assert_eq!(net.key_version.public_prefix, "xpub");
        assert_eq!(net.bitcoin_network(), bitcoin::Network::Bitcoin);
    }

    #[test]
    fn test_network_from_type() {
        for ty in NetworkType::ALL {
            assert_eq!(Network::from_type(ty).network_type, ty);
        }
        let net = Network::from_type(NetworkType::Regtest);
        assert_eq!(net.bech32_hrp, "bcrt");
        assert_eq!(net.key_version.private_prefix, "tprv");
    }

    #[test]
    fn test_non_mainnet_share_test_versions() {
        for ty in [NetworkType::Testnet, NetworkType::Signet, NetworkType::Regtest] {
            let net = Network::from_type(ty);
            assert_eq!(net.key_version, TEST_KEY_VERSION);
            assert_eq!(net.coin_type, 1);
        }
    }

    #[test]
    fn test_parse_and_serde_names() {
        assert_eq!("Regtest".parse::<NetworkType>().unwrap(), NetworkType::Regtest);
        assert_eq!("bitcoin".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert!("liquid".parse::<NetworkType>().is_err());

        let json = serde_json::to_string(&NetworkType::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
        let back: NetworkType = serde_json::from_str("\"signet\"").unwrap();
        assert_eq!(back, NetworkType::Signet);
    }

    #[test]
    fn test_key_version_lookup() {
        assert!(Network::key_version_is_mainnet([0x04, 0x88, 0xB2, 0x1E]).unwrap());
        assert!(!Network::key_version_is_mainnet([0x04, 0x35, 0x83, 0x94]).unwrap());
        assert!(Network::key_version_is_mainnet([0, 0, 0, 0]).is_err());
    }
}
