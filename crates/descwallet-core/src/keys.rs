//! Key derivation and management
//!
//! Implements BIP-39 mnemonic handling and BIP-32 master key derivation.
//! Every extended key is serialised with the version bytes of the wallet
//! network, so the `tprv`/`tpub` or `xprv`/`xpub` prefix is a pure function of
//! [`NetworkType`].

use crate::{Error, Result};
use bip39::{Language, Mnemonic};
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use descwallet_params::{Network, NetworkType};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Mnemonic lengths accepted by [`generate`]
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Default mnemonic length
pub const DEFAULT_WORD_COUNT: usize = 24;

/// Entropy size in bytes for a mnemonic of `word_count` words
///
/// 12 words = 128 bits, each additional 3 words add 32 bits.
pub fn entropy_len(word_count: usize) -> Result<usize> {
    if !VALID_WORD_COUNTS.contains(&word_count) {
        return Err(Error::InvalidWordCount(word_count));
    }
    Ok(word_count / 3 * 4)
}

/// Serialisation prefixes `(private, public)` used for `network`
pub fn extended_key_prefix(network: NetworkType) -> (&'static str, &'static str) {
    let version = Network::from_type(network).key_version;
    (version.private_prefix, version.public_prefix)
}

/// Mnemonic plus the master extended key pair derived from it
#[derive(Clone)]
pub struct ExtendedKeyPair {
    network: NetworkType,
    mnemonic: Zeroizing<String>,
    ext_priv_key: Xpriv,
    ext_pub_key: Xpub,
}

impl ExtendedKeyPair {
    /// Network the keys are serialised for
    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Canonical single-space mnemonic
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Mnemonic words in order
    pub fn words(&self) -> Vec<&str> {
        self.mnemonic.split(' ').collect()
    }

    /// Master extended private key (path `m`)
    pub fn ext_priv_key(&self) -> &Xpriv {
        &self.ext_priv_key
    }

    /// Master extended public key (path `m`)
    pub fn ext_pub_key(&self) -> &Xpub {
        &self.ext_pub_key
    }

    /// Standard BIP-84 receive and change descriptors for this key
    pub fn bip84_descriptors(&self) -> (String, String) {
        let coin_type = Network::from_type(self.network).coin_type;
        let external = format!("wpkh({}/84'/{}'/0'/0/*)", self.ext_priv_key, coin_type);
        let internal = format!("wpkh({}/84'/{}'/0'/1/*)", self.ext_priv_key, coin_type);
        (external, internal)
    }
}

impl fmt::Debug for ExtendedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKeyPair")
            .field("network", &self.network)
            .field("ext_pub_key", &self.ext_pub_key.to_string())
            .finish_non_exhaustive()
    }
}

/// String form of an [`ExtendedKeyPair`] for the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedKeys {
    /// Mnemonic words separated by single spaces
    pub mnemonic: String,
    /// Serialised master private key
    pub ext_priv_key: String,
    /// Serialised master public key
    pub ext_pub_key: String,
}

impl From<&ExtendedKeyPair> for ExtendedKeys {
    fn from(pair: &ExtendedKeyPair) -> Self {
        Self {
            mnemonic: pair.mnemonic.to_string(),
            ext_priv_key: pair.ext_priv_key.to_string(),
            ext_pub_key: pair.ext_pub_key.to_string(),
        }
    }
}

/// Generate a fresh mnemonic of `word_count` words and derive its master keys
pub fn generate(network: NetworkType, word_count: usize) -> Result<ExtendedKeyPair> {
    let mut entropy = Zeroizing::new(vec![0u8; entropy_len(word_count)?]);
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic =
        Mnemonic::from_entropy(&entropy).map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    tracing::debug!("Generated {}-word mnemonic for {}", word_count, network);
    derive_pair(network, &mnemonic)
}

/// Derive the master key pair of an existing mnemonic
///
/// Deterministic: the same phrase and network always give the same keys.
/// Surrounding and repeated whitespace is ignored.
pub fn from_mnemonic(network: NetworkType, mnemonic: &str) -> Result<ExtendedKeyPair> {
    let normalized = Zeroizing::new(
        mnemonic
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    let parsed = Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    derive_pair(network, &parsed)
}

fn derive_pair(network: NetworkType, mnemonic: &Mnemonic) -> Result<ExtendedKeyPair> {
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let params = Network::from_type(network);

    let ext_priv_key = Xpriv::new_master(params.bitcoin_network(), &seed[..])?;
    let ext_pub_key = public_key_from_private(&ext_priv_key);

    Ok(ExtendedKeyPair {
        network,
        mnemonic: Zeroizing::new(mnemonic.to_string()),
        ext_priv_key,
        ext_pub_key,
    })
}

/// Neuter an extended private key
pub fn public_key_from_private(xprv: &Xpriv) -> Xpub {
    let secp = Secp256k1::signing_only();
    Xpub::from_priv(&secp, xprv)
}

/// Parse an extended private key and check it belongs to `network`
pub fn parse_ext_priv_key(network: NetworkType, encoded: &str) -> Result<Xpriv> {
    let xprv = Xpriv::from_str(encoded.trim())?;
    let expected = Network::from_type(network).is_mainnet();
    if xprv.network.is_mainnet() != expected {
        return Err(Error::NetworkMismatch(format!(
            "extended key is not a {} key",
            network
        )));
    }
    Ok(xprv)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "shell bid diary primary focus average truly secret lonely circle radar fall tank action place body wedding sponsor embody glue swing gauge shop penalty";

    #[test]
    fn test_entropy_sizes() {
        assert_eq!(entropy_len(12).unwrap(), 16);
        assert_eq!(entropy_len(15).unwrap(), 20);
        assert_eq!(entropy_len(18).unwrap(), 24);
        assert_eq!(entropy_len(21).unwrap(), 28);
        assert_eq!(entropy_len(24).unwrap(), 32);
        assert!(matches!(entropy_len(13), Err(Error::InvalidWordCount(13))));
        assert!(matches!(entropy_len(0), Err(Error::InvalidWordCount(0))));
    }

    #[test]
    fn test_generate_mnemonic() {
        for count in VALID_WORD_COUNTS {
            let pair = generate(NetworkType::Testnet, count).unwrap();
            assert_eq!(pair.words().len(), count);
            assert!(pair.ext_priv_key().to_string().starts_with("tprv"));
            assert!(pair.ext_pub_key().to_string().starts_with("tpub"));
        }
    }

    #[test]
    fn test_generate_rejects_bad_word_count() {
        assert!(matches!(
            generate(NetworkType::Testnet, 11),
            Err(Error::InvalidWordCount(11))
        ));
    }

    #[test]
    fn test_known_vector() {
        let pair = from_mnemonic(NetworkType::Testnet, PHRASE).unwrap();
        assert_eq!(
            pair.ext_priv_key().to_string(),
            "tprv8ZgxMBicQKsPeh5nd4nCDLGh9dLfhqGfUoiQsbThkttjX9oroRY2j5vpEGwkiKiKtzdU7u4eqH2yFicGvz19rMVVXfY8XB9fdoeXWJ7SgVE"
        );
        assert_eq!(
            pair.ext_pub_key().to_string(),
            "tpubD6NzVbkrYhZ4YA7aWiSncjvoierbsATa47KCA7W1BAh8Me4dRpMcuaYgQSoHMctaWGmEGx6qLU557xykguQLMSwv4H72fktpFuVcdjQ1hgw"
        );
    }

    #[test]
    fn test_mainnet_prefix() {
        let pair = from_mnemonic(NetworkType::Mainnet, PHRASE).unwrap();
        assert!(pair.ext_priv_key().to_string().starts_with("xprv"));
        assert!(pair.ext_pub_key().to_string().starts_with("xpub"));
        assert_eq!(extended_key_prefix(NetworkType::Mainnet), ("xprv", "xpub"));
        assert_eq!(extended_key_prefix(NetworkType::Regtest), ("tprv", "tpub"));
    }

    #[test]
    fn test_whitespace_normalised() {
        let messy = format!("  {}  ", PHRASE.replace(' ', "   ").to_uppercase());
        let a = from_mnemonic(NetworkType::Testnet, &messy).unwrap();
        let b = from_mnemonic(NetworkType::Testnet, PHRASE).unwrap();
        assert_eq!(a.mnemonic(), PHRASE);
        assert_eq!(a.ext_priv_key(), b.ext_priv_key());
    }

    #[test]
    fn test_invalid_mnemonic() {
        let bad_checksum = PHRASE.replace("penalty", "shell");
        assert!(matches!(
            from_mnemonic(NetworkType::Testnet, &bad_checksum),
            Err(Error::InvalidMnemonic(_))
        ));
        assert!(matches!(
            from_mnemonic(NetworkType::Testnet, "not a real phrase"),
            Err(Error::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_public_derivable_from_private() {
        let pair = generate(NetworkType::Regtest, 12).unwrap();
        assert_eq!(&public_key_from_private(pair.ext_priv_key()), pair.ext_pub_key());
    }

    #[test]
    fn test_parse_ext_priv_key_network_check() {
        let pair = from_mnemonic(NetworkType::Testnet, PHRASE).unwrap();
        let encoded = pair.ext_priv_key().to_string();
        assert!(parse_ext_priv_key(NetworkType::Regtest, &encoded).is_ok());
        assert!(matches!(
            parse_ext_priv_key(NetworkType::Mainnet, &encoded),
            Err(Error::NetworkMismatch(_))
        ));
    }

    #[test]
    fn test_bip84_descriptors() {
        let pair = from_mnemonic(NetworkType::Testnet, PHRASE).unwrap();
        let (external, internal) = pair.bip84_descriptors();
        assert!(external.starts_with("wpkh(tprv"));
        assert!(external.ends_with("/84'/1'/0'/0/*)"));
        assert!(internal.ends_with("/84'/1'/0'/1/*)"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let pair = from_mnemonic(NetworkType::Testnet, PHRASE).unwrap();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("shell"));
        assert!(!debug.contains("tprv"));
    }
}
