//! Output descriptor parsing and script derivation
//!
//! Supports the single-key templates a descriptor wallet needs:
//! `pkh(KEY)`, `wpkh(KEY)`, `sh(wpkh(KEY))` and key-path-only `tr(KEY)`.
//!
//! Parsing, checksums and script derivation are delegated to `miniscript`;
//! this module narrows its descriptor language to those templates and keeps
//! any private keys in the parsed `KeyMap` for the signer.

use crate::types::KeychainKind;
use crate::{secp, Error, Result};
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, NetworkKind, ScriptBuf};
use descwallet_params::{Network, NetworkType};
use miniscript::descriptor::checksum::Engine;
use miniscript::descriptor::{
    Descriptor as OutputDescriptor, DescriptorPublicKey, DescriptorSecretKey, KeyMap, ShInner,
    Wildcard,
};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// BIP-380 checksum of a descriptor body (without `#`)
pub fn checksum(body: &str) -> Result<String> {
    let mut engine = Engine::new();
    engine
        .input(body)
        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
    Ok(engine.checksum())
}

/// Script template wrapping the descriptor key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptTemplate {
    /// Legacy pay-to-pubkey-hash
    Pkh,
    /// Native segwit v0 pay-to-witness-pubkey-hash
    Wpkh,
    /// P2WPKH nested in P2SH
    ShWpkh,
    /// Taproot key-path spend, no script tree
    Tr,
}

impl ScriptTemplate {
    /// Whether spends use a witness
    pub fn is_segwit(&self) -> bool {
        !matches!(self, ScriptTemplate::Pkh)
    }
}

/// Address and script at one derivation index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedScript {
    /// Derivation index
    pub index: u32,
    /// Encoded address
    pub address: Address,
    /// Output script
    pub script_pubkey: ScriptBuf,
}

/// Parsed single-key output descriptor
#[derive(Clone)]
pub struct Descriptor {
    template: ScriptTemplate,
    inner: OutputDescriptor<DescriptorPublicKey>,
    key: DescriptorPublicKey,
    keymap: KeyMap,
}

fn unsupported(what: impl fmt::Display) -> Error {
    Error::InvalidDescriptor(format!("unsupported script template: {}", what))
}

impl Descriptor {
    /// Parse a descriptor string, verifying a trailing `#checksum` if present
    pub fn parse(input: &str) -> Result<Self> {
        let (inner, keymap) =
            OutputDescriptor::<DescriptorPublicKey>::parse_descriptor(secp(), input.trim())
                .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;

        let (template, key) = match &inner {
            OutputDescriptor::Pkh(pkh) => (ScriptTemplate::Pkh, pkh.as_inner().clone()),
            OutputDescriptor::Wpkh(wpkh) => (ScriptTemplate::Wpkh, wpkh.as_inner().clone()),
            OutputDescriptor::Sh(sh) => match sh.as_inner() {
                ShInner::Wpkh(wpkh) => (ScriptTemplate::ShWpkh, wpkh.as_inner().clone()),
                _ => return Err(unsupported(&inner)),
            },
            OutputDescriptor::Tr(tr) => {
                if tr.tap_tree().is_some() {
                    return Err(Error::InvalidDescriptor(
                        "taproot script trees are not supported".to_string(),
                    ));
                }
                (ScriptTemplate::Tr, tr.internal_key().clone())
            }
            _ => return Err(unsupported(&inner)),
        };

        if key.is_multipath() {
            return Err(Error::InvalidDescriptor(
                "multipath keys are not supported".to_string(),
            ));
        }
        if let DescriptorPublicKey::XPub(xkey) = &key {
            if xkey.wildcard == Wildcard::Hardened {
                return Err(Error::InvalidDescriptor(
                    "hardened wildcards are not supported".to_string(),
                ));
            }
        }

        let descriptor = Self {
            template,
            inner,
            key,
            keymap,
        };
        descriptor.derive_public_key(0).map_err(|e| match e {
            Error::InvalidDescriptor(_) => e,
            other => Error::InvalidDescriptor(other.to_string()),
        })?;
        tracing::debug!("Parsed {:?} descriptor", template);
        Ok(descriptor)
    }

    /// Script template
    pub fn template(&self) -> ScriptTemplate {
        self.template
    }

    /// Whether the key path ends in a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.key.has_wildcard()
    }

    /// Whether the descriptor embeds private key material
    pub fn has_private_key(&self) -> bool {
        self.keymap.contains_key(&self.key)
    }

    /// Network family of the embedded key, if it encodes one
    pub fn network_kind(&self) -> Option<NetworkKind> {
        let secret = match self.keymap.get(&self.key) {
            Some(DescriptorSecretKey::XPrv(xkey)) => Some(xkey.xkey.network),
            Some(DescriptorSecretKey::Single(single)) => Some(single.key.network),
            _ => None,
        };
        secret.or(match &self.key {
            DescriptorPublicKey::XPub(xkey) => Some(xkey.xkey.network),
            _ => None,
        })
    }

    /// Check that the embedded key is encoded for `network`
    pub fn check_network(&self, network: NetworkType) -> Result<()> {
        let expected_mainnet = Network::from_type(network).is_mainnet();
        match self.network_kind() {
            Some(kind) if kind.is_mainnet() != expected_mainnet => Err(Error::NetworkMismatch(
                format!("descriptor key is not valid on {}", network),
            )),
            _ => Ok(()),
        }
    }

    /// Public key at `index`
    pub fn derive_public_key(&self, index: u32) -> Result<CompressedPublicKey> {
        let definite = self
            .key
            .clone()
            .at_derivation_index(index)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let pk = definite
            .derive_public_key(secp())
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        CompressedPublicKey::try_from(pk).map_err(|e| Error::InvalidDescriptor(e.to_string()))
    }

    /// Secret key at `index`, `None` for watch-only descriptors
    pub fn derive_secret_key(&self, index: u32) -> Result<Option<SecretKey>> {
        match self.keymap.get(&self.key) {
            None => Ok(None),
            Some(DescriptorSecretKey::Single(single)) => Ok(Some(single.key.inner)),
            Some(DescriptorSecretKey::XPrv(xkey)) => {
                let path = match xkey.wildcard {
                    Wildcard::None => xkey.derivation_path.clone(),
                    Wildcard::Unhardened => xkey
                        .derivation_path
                        .child(ChildNumber::from_normal_idx(index)?),
                    Wildcard::Hardened => xkey
                        .derivation_path
                        .child(ChildNumber::from_hardened_idx(index)?),
                };
                Ok(Some(xkey.xkey.derive_priv(secp(), &path)?.private_key))
            }
            Some(DescriptorSecretKey::MultiXPrv(_)) => Err(Error::InvalidDescriptor(
                "multipath keys are not supported".to_string(),
            )),
        }
    }

    /// BIP-32 origin of the key at `index` for PSBT derivation fields
    pub fn key_origin(&self, index: u32) -> Result<(Fingerprint, DerivationPath)> {
        let mut path = self.key.full_derivation_path().ok_or_else(|| {
            Error::InvalidDescriptor("multipath keys are not supported".to_string())
        })?;
        if self.key.has_wildcard() {
            path = path.child(ChildNumber::from_normal_idx(index)?);
        }
        Ok((self.key.master_fingerprint(), path))
    }

    /// Address and output script at `index`
    ///
    /// Pure: the same descriptor, index and network always give the same
    /// result. Non-wildcard descriptors ignore `index`.
    pub fn derive_script(&self, index: u32, network: NetworkType) -> Result<DerivedScript> {
        let network = Network::from_type(network).bitcoin_network();
        let definite = self
            .inner
            .at_derivation_index(index)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let address = definite
            .address(network)
            .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
        Ok(DerivedScript {
            index,
            script_pubkey: definite.script_pubkey(),
            address,
        })
    }

    /// Redeem script for `sh(wpkh)` at `index`
    pub fn redeem_script(&self, index: u32) -> Result<Option<ScriptBuf>> {
        if self.template != ScriptTemplate::ShWpkh {
            return Ok(None);
        }
        let pk = self.derive_public_key(index)?;
        Ok(Some(ScriptBuf::new_p2wpkh(&pk.wpubkey_hash())))
    }

    /// Next derivation index to hand out
    ///
    /// Strictly greater than every index in `used` and than `last_revealed`,
    /// so a used index is never handed out again. Always 0 for fixed keys.
    pub fn next_unused_index(&self, used: &BTreeSet<u32>, last_revealed: Option<u32>) -> u32 {
        if !self.has_wildcard() {
            return 0;
        }
        let after_used = used.iter().next_back().map(|i| i.saturating_add(1));
        let after_revealed = last_revealed.map(|i| i.saturating_add(1));
        after_used.max(after_revealed).unwrap_or(0)
    }

    /// Descriptor with private keys replaced by public keys, checksummed
    pub fn to_public_string(&self) -> Result<String> {
        Ok(self.inner.to_string())
    }

    /// Full descriptor including any private keys, checksummed
    pub fn to_string_with_secret(&self) -> Result<String> {
        Ok(self.inner.to_string_with_secret(&self.keymap))
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("template", &self.template)
            .field("wildcard", &self.has_wildcard())
            .field("private", &self.has_private_key())
            .finish()
    }
}

impl FromStr for Descriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// External and optional internal descriptor of one wallet
#[derive(Debug, Clone)]
pub struct DescriptorPair {
    /// Receive descriptor
    pub external: Descriptor,
    /// Change descriptor
    pub internal: Option<Descriptor>,
}

impl DescriptorPair {
    /// Parse and validate both descriptors against `network`
    pub fn parse(network: NetworkType, external: &str, internal: Option<&str>) -> Result<Self> {
        let external = Descriptor::parse(external)?;
        external.check_network(network)?;
        let internal = internal
            .filter(|s| !s.trim().is_empty())
            .map(Descriptor::parse)
            .transpose()?;
        if let Some(internal) = &internal {
            internal.check_network(network)?;
        }
        Ok(Self { external, internal })
    }

    /// Descriptor for a keychain; change falls back to external
    pub fn for_keychain(&self, keychain: KeychainKind) -> &Descriptor {
        match keychain {
            KeychainKind::Internal => self.internal.as_ref().unwrap_or(&self.external),
            KeychainKind::External => &self.external,
        }
    }

    /// Keychain used for change outputs
    pub fn change_keychain(&self) -> KeychainKind {
        if self.internal.is_some() {
            KeychainKind::Internal
        } else {
            KeychainKind::External
        }
    }

    /// Whether any descriptor carries private keys
    pub fn has_private_key(&self) -> bool {
        self.external.has_private_key()
            || self.internal.as_ref().is_some_and(Descriptor::has_private_key)
    }
}
