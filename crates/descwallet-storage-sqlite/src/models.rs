//! Stored records

use descwallet_core::{Wallet, WalletConfig};
use descwallet_params::NetworkType;

/// Wallet identity row
///
/// Descriptors are kept in public form so the file never holds key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMeta {
    /// Network of the descriptors
    pub network: NetworkType,
    /// Public receive descriptor with checksum
    pub external_descriptor: String,
    /// Public change descriptor with checksum
    pub internal_descriptor: Option<String>,
    /// Wallet configuration at creation
    pub config: WalletConfig,
    /// Unix seconds
    pub created_at: i64,
}

impl WalletMeta {
    /// Metadata describing `wallet`
    pub fn for_wallet(wallet: &Wallet) -> descwallet_core::Result<Self> {
        let (external_descriptor, internal_descriptor) = wallet.public_descriptors()?;
        Ok(Self {
            network: wallet.network(),
            external_descriptor,
            internal_descriptor,
            config: wallet.config().clone(),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Whether `other` describes the same wallet
    pub fn same_wallet(&self, other: &WalletMeta) -> bool {
        self.network == other.network
            && self.external_descriptor == other.external_descriptor
            && self.internal_descriptor == other.internal_descriptor
    }
}

/// Last persisted sync position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Chain tip height
    pub tip_height: u32,
    /// Unix seconds of the last write
    pub updated_at: i64,
}
