//! Relay and standardness policy used when building transactions

use crate::network::{Network, NetworkType};

/// Satoshis per bitcoin
pub const COIN: u64 = 100_000_000;

/// Relay policy parameters
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    /// Network configuration
    pub network: Network,
    /// Minimum relay fee rate (sat/vB)
    pub min_relay_fee_rate: f32,
    /// Highest fee rate the wallet will ever use (sat/vB)
    pub max_fee_rate: f32,
    /// Fee rate used to price dust outputs (sat/vB)
    pub dust_relay_fee_rate: f32,
    /// Coinbase maturity (blocks)
    pub coinbase_maturity: u32,
    /// Maximum supply (satoshis)
    pub max_money: u64,
}

impl RelayPolicy {
    /// Policy for mainnet
    pub fn mainnet() -> Self {
        Self::for_network(Network::mainnet())
    }

    /// Policy for regtest
    pub fn regtest() -> Self {
        Self {
            coinbase_maturity: 100,
            ..Self::for_network(Network::regtest())
        }
    }

    /// Get relay policy by network type
    pub fn from_network(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Regtest => Self::regtest(),
            other => Self::for_network(Network::from_type(other)),
        }
    }

    fn for_network(network: Network) -> Self {
        Self {
            network,
            min_relay_fee_rate: 1.0,
            max_fee_rate: 10_000.0,
            dust_relay_fee_rate: 3.0,
            coinbase_maturity: 100,
            max_money: 21_000_000 * COIN,
        }
    }

    /// Check if amount is valid (within max supply)
    pub fn is_valid_amount(&self, amount: u64) -> bool {
        amount <= self.max_money
    }

    /// Check if a fee rate is within relay bounds
    pub fn is_valid_fee_rate(&self, sat_per_vb: f32) -> bool {
        sat_per_vb.is_finite()
            && sat_per_vb >= self.min_relay_fee_rate
            && sat_per_vb <= self.max_fee_rate
    }
}
