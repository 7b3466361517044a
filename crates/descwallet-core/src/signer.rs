//! PSBT signer and finalizer
//!
//! Signs every input whose previous output pays to a script the wallet
//! tracks, using the key derived from the owning descriptor. ECDSA with
//! `SIGHASH_ALL` for `pkh`, `wpkh` and `sh(wpkh)`; BIP-341 key-path Schnorr
//! with `SIGHASH_DEFAULT` for `tr`. Inputs owned by someone else are left
//! untouched so several parties can sign the same PSBT.
//!
//! Finalization only uses a signature whose key matches the spent script
//! and which verifies against the input's sighash.

use crate::descriptor::DescriptorPair;
use crate::index::ScriptMap;
use crate::types::TxLifecycle;
use crate::{secp, Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::key::TapTweak;
use bitcoin::psbt::{Input as PsbtInput, Psbt};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{ecdsa, taproot, PublicKey, Script, ScriptBuf, Transaction, TxIn, TxOut, Witness};

/// Signed PSBT and whether every input is now final
#[derive(Debug, Clone)]
pub struct SignResult {
    /// PSBT carrying the new signatures
    pub psbt: Psbt,
    /// Every input has a final scriptSig or witness
    pub finalized: bool,
}

impl SignResult {
    /// Where the signed transaction stands
    pub fn lifecycle(&self) -> TxLifecycle {
        if self.finalized {
            TxLifecycle::Finalized
        } else {
            TxLifecycle::PartiallySigned
        }
    }
}

/// Signer bound to a wallet's descriptors and tracked scripts
#[derive(Debug, Clone, Copy)]
pub struct Signer<'a> {
    descriptors: &'a DescriptorPair,
    scripts: &'a ScriptMap,
}

impl<'a> Signer<'a> {
    /// Create new signer
    pub fn new(descriptors: &'a DescriptorPair, scripts: &'a ScriptMap) -> Self {
        Self {
            descriptors,
            scripts,
        }
    }

    /// Sign all wallet-owned inputs, then finalize what can be finalized
    pub fn sign(&self, mut psbt: Psbt) -> Result<SignResult> {
        if psbt.inputs.len() != psbt.unsigned_tx.input.len() {
            return Err(Error::InvalidPsbt(
                "input count does not match the unsigned transaction".to_string(),
            ));
        }
        let unsigned = psbt.unsigned_tx.clone();
        let prevouts: Vec<Option<TxOut>> = psbt
            .inputs
            .iter()
            .zip(&unsigned.input)
            .map(|(input, txin)| prevout(input, txin))
            .collect();
        let mut cache = SighashCache::new(&unsigned);

        let mut signed = 0usize;
        let mut missing_keys = 0usize;
        for (i, input) in psbt.inputs.iter_mut().enumerate() {
            if is_final(input) {
                continue;
            }
            let Some(txout) = &prevouts[i] else {
                continue;
            };
            let Some((keychain, index)) = self.scripts.get(&txout.script_pubkey) else {
                tracing::debug!("Skipping input {}: not owned", i);
                continue;
            };
            let descriptor = self.descriptors.for_keychain(*keychain);
            let Some(secret) = descriptor.derive_secret_key(*index)? else {
                missing_keys += 1;
                continue;
            };

            let script = &txout.script_pubkey;
            if script.is_p2tr() {
                let all: Vec<TxOut> = prevouts
                    .iter()
                    .cloned()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        Error::InvalidPsbt("taproot signing needs every previous output".to_string())
                    })?;
                input.tap_key_sig = Some(sign_taproot(&mut cache, i, &all, &secret)?);
            } else if script.is_p2wpkh() {
                sign_segwit_v0(&mut cache, input, i, script, txout, &secret)?;
            } else if script.is_p2sh() {
                let redeem = input
                    .redeem_script
                    .clone()
                    .ok_or_else(|| Error::InvalidPsbt(format!("input {} lacks a redeem script", i)))?;
                sign_segwit_v0(&mut cache, input, i, &redeem, txout, &secret)?;
            } else if script.is_p2pkh() {
                let sighash = cache
                    .legacy_signature_hash(i, script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| Error::TransactionSigning(e.to_string()))?;
                insert_ecdsa(input, Message::from_digest(sighash.to_byte_array()), &secret);
            } else {
                return Err(Error::TransactionSigning(format!(
                    "unsupported script type on input {}",
                    i
                )));
            }
            signed += 1;
        }

        if signed == 0 && missing_keys > 0 {
            return Err(Error::MissingPrivateKey(format!(
                "{} wallet input(s) need a private key",
                missing_keys
            )));
        }

        let incomplete = finalize_inputs(&mut psbt)?;
        tracing::info!(
            "Signed {} of {} inputs, {} not final",
            signed,
            psbt.inputs.len(),
            incomplete.len()
        );
        Ok(SignResult {
            psbt,
            finalized: incomplete.is_empty(),
        })
    }
}

/// Finalize every input and extract the network transaction
///
/// The result keeps the unsigned transaction's version, lock time, inputs
/// and outputs; only scriptSigs and witnesses are filled in.
pub fn finalize(mut psbt: Psbt) -> Result<Transaction> {
    let incomplete = finalize_inputs(&mut psbt)?;
    if !incomplete.is_empty() {
        return Err(Error::IncompleteSignatures(format!(
            "inputs {:?} lack signatures",
            incomplete
        )));
    }
    let mut tx = psbt.unsigned_tx;
    for (txin, input) in tx.input.iter_mut().zip(psbt.inputs) {
        txin.script_sig = input.final_script_sig.unwrap_or_default();
        txin.witness = input.final_script_witness.unwrap_or_default();
    }
    Ok(tx)
}

fn prevout(input: &PsbtInput, txin: &TxIn) -> Option<TxOut> {
    if let Some(txout) = &input.witness_utxo {
        return Some(txout.clone());
    }
    input
        .non_witness_utxo
        .as_ref()
        .filter(|prev| prev.compute_txid() == txin.previous_output.txid)
        .and_then(|prev| prev.output.get(txin.previous_output.vout as usize).cloned())
}

fn is_final(input: &PsbtInput) -> bool {
    input.final_script_sig.is_some() || input.final_script_witness.is_some()
}

fn sign_segwit_v0(
    cache: &mut SighashCache<&Transaction>,
    input: &mut PsbtInput,
    index: usize,
    script_code: &Script,
    txout: &TxOut,
    secret: &SecretKey,
) -> Result<()> {
    let sighash = cache
        .p2wpkh_signature_hash(index, script_code, txout.value, EcdsaSighashType::All)
        .map_err(|e| Error::TransactionSigning(e.to_string()))?;
    insert_ecdsa(input, Message::from_digest(sighash.to_byte_array()), secret);
    Ok(())
}

fn insert_ecdsa(input: &mut PsbtInput, msg: Message, secret: &SecretKey) {
    let secp = secp();
    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&msg, secret),
        sighash_type: EcdsaSighashType::All,
    };
    let pk = PublicKey::new(secret.public_key(secp));
    input.partial_sigs.insert(pk, signature);
}

fn sign_taproot(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    prevouts: &[TxOut],
    secret: &SecretKey,
) -> Result<taproot::Signature> {
    let secp = secp();
    let sighash = cache
        .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), TapSighashType::Default)
        .map_err(|e| Error::TransactionSigning(e.to_string()))?;
    let keypair = Keypair::from_secret_key(secp, secret);
    let tweaked = keypair.tap_tweak(secp, None);
    let msg = Message::from_digest(sighash.to_byte_array());
    Ok(taproot::Signature {
        signature: secp.sign_schnorr_no_aux_rand(&msg, &tweaked.to_inner()),
        sighash_type: TapSighashType::Default,
    })
}

/// Finalize what can be finalized; returns indices still lacking signatures
///
/// A matching signature that fails verification is an error.
fn finalize_inputs(psbt: &mut Psbt) -> Result<Vec<usize>> {
    let unsigned = psbt.unsigned_tx.clone();
    let prevouts: Vec<Option<TxOut>> = psbt
        .inputs
        .iter()
        .zip(&unsigned.input)
        .map(|(input, txin)| prevout(input, txin))
        .collect();
    let mut cache = SighashCache::new(&unsigned);

    let mut incomplete = Vec::new();
    for (i, input) in psbt.inputs.iter_mut().enumerate() {
        if is_final(input) {
            continue;
        }
        let finalized = match &prevouts[i] {
            Some(txout) => finalize_input(&mut cache, i, input, txout, &prevouts)?,
            None => false,
        };
        if !finalized {
            incomplete.push(i);
        }
    }
    Ok(incomplete)
}

/// Whether `pk` is the key `script` pays to
fn pays_to(script: &Script, redeem: Option<&ScriptBuf>, pk: &PublicKey) -> bool {
    if script.is_p2pkh() {
        return script == ScriptBuf::new_p2pkh(&pk.pubkey_hash()).as_script();
    }
    let Ok(wpkh) = pk.wpubkey_hash() else {
        return false;
    };
    let witness_program = ScriptBuf::new_p2wpkh(&wpkh);
    if script.is_p2wpkh() {
        script == witness_program.as_script()
    } else if script.is_p2sh() {
        redeem.is_some_and(|r| {
            *r == witness_program && script == ScriptBuf::new_p2sh(&r.script_hash()).as_script()
        })
    } else {
        false
    }
}

fn verify_ecdsa(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    input: &PsbtInput,
    txout: &TxOut,
    pk: &PublicKey,
    sig: &ecdsa::Signature,
) -> Result<()> {
    let script = &txout.script_pubkey;
    let digest = if script.is_p2pkh() {
        cache
            .legacy_signature_hash(index, script, sig.sighash_type.to_u32())
            .map_err(|e| Error::InvalidPsbt(e.to_string()))?
            .to_byte_array()
    } else {
        let script_code = if script.is_p2sh() {
            input.redeem_script.as_deref().unwrap_or(script.as_script())
        } else {
            script.as_script()
        };
        cache
            .p2wpkh_signature_hash(index, script_code, txout.value, sig.sighash_type)
            .map_err(|e| Error::InvalidPsbt(e.to_string()))?
            .to_byte_array()
    };
    secp()
        .verify_ecdsa(&Message::from_digest(digest), &sig.signature, &pk.inner)
        .map_err(|_| Error::InvalidPsbt(format!("input {} has an invalid signature", index)))
}

fn verify_taproot(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    script: &Script,
    prevouts: &[Option<TxOut>],
    sig: &taproot::Signature,
) -> Result<()> {
    let all: Vec<TxOut> = prevouts
        .iter()
        .cloned()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            Error::InvalidPsbt("taproot finalization needs every previous output".to_string())
        })?;
    let output_key = XOnlyPublicKey::from_slice(&script.as_bytes()[2..])
        .map_err(|e| Error::InvalidPsbt(e.to_string()))?;
    let sighash = cache
        .taproot_key_spend_signature_hash(index, &Prevouts::All(&all), sig.sighash_type)
        .map_err(|e| Error::InvalidPsbt(e.to_string()))?;
    secp()
        .verify_schnorr(
            &sig.signature,
            &Message::from_digest(sighash.to_byte_array()),
            &output_key,
        )
        .map_err(|_| Error::InvalidPsbt(format!("input {} has an invalid signature", index)))
}

fn finalize_input(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    input: &mut PsbtInput,
    txout: &TxOut,
    prevouts: &[Option<TxOut>],
) -> Result<bool> {
    let script = &txout.script_pubkey;
    if script.is_p2tr() {
        let Some(sig) = input.tap_key_sig else {
            return Ok(false);
        };
        verify_taproot(cache, index, script, prevouts, &sig)?;
        input.final_script_witness = Some(Witness::p2tr_key_spend(&sig));
    } else {
        let owner = input
            .partial_sigs
            .iter()
            .find(|(pk, _)| pays_to(script, input.redeem_script.as_ref(), pk))
            .map(|(pk, sig)| (*pk, *sig));
        let Some((pk, sig)) = owner else {
            return Ok(false);
        };
        verify_ecdsa(cache, index, input, txout, &pk, &sig)?;

        if script.is_p2wpkh() {
            input.final_script_witness = Some(Witness::p2wpkh(&sig, &pk.inner));
        } else if script.is_p2sh() {
            let Some(redeem) = input.redeem_script.as_ref() else {
                return Ok(false);
            };
            let Ok(push) = PushBytesBuf::try_from(redeem.to_bytes()) else {
                return Ok(false);
            };
            input.final_script_sig = Some(Builder::new().push_slice(push).into_script());
            input.final_script_witness = Some(Witness::p2wpkh(&sig, &pk.inner));
        } else {
            input.final_script_sig = Some(
                Builder::new()
                    .push_slice(sig.serialize())
                    .push_key(&pk)
                    .into_script(),
            );
        }
    }

    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.tap_key_sig = None;
    input.tap_internal_key = None;
    input.tap_key_origins.clear();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ChainSnapshot, ChainTx, UtxoIndex};
    use crate::transaction::{BuildContext, CreateTxResult, TxBuilder};
    use crate::types::KeychainKind;
    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::schnorr;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Txid};
    use descwallet_params::NetworkType;

    const TPRV: &str = "tprv8ZgxMBicQKsPexGYyaFwnAsCXCjmz2FaTm6LtesyyihjbQE3gRMfXqQBXKM43DvC1UgRVv1qom1qFxNMSqVAs88qx9PhgFnfGVUdiiDf6j4";

    fn descriptors(template: &str) -> DescriptorPair {
        let external = template.replace("KEY", &format!("{}/86'/1'/0'/0/*", TPRV));
        let internal = template.replace("KEY", &format!("{}/86'/1'/0'/1/*", TPRV));
        DescriptorPair::parse(NetworkType::Regtest, &external, Some(&internal)).unwrap()
    }

    fn wallet(pair: &DescriptorPair) -> UtxoIndex {
        let mut scripts = ScriptMap::new();
        for keychain in KeychainKind::ALL {
            for index in 0..3 {
                let derived = pair
                    .for_keychain(keychain)
                    .derive_script(index, NetworkType::Regtest)
                    .unwrap();
                scripts.insert(derived.script_pubkey, (keychain, index));
            }
        }
        let receive = pair
            .external
            .derive_script(1, NetworkType::Regtest)
            .unwrap()
            .script_pubkey;
        let funding = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([3; 32]), 1),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(70_000),
                    script_pubkey: receive.clone(),
                },
                TxOut {
                    value: Amount::from_sat(40_000),
                    script_pubkey: receive,
                },
            ],
        };
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts,
            ChainSnapshot {
                tip_height: 10,
                transactions: vec![ChainTx {
                    tx: funding,
                    height: Some(9),
                    block_time: Some(1_700_000_000),
                }],
            },
        );
        index
    }

    fn build(pair: &DescriptorPair, index: &UtxoIndex, amount: u64) -> CreateTxResult {
        let snapshot = index.snapshot();
        let mut builder = TxBuilder::new(NetworkType::Regtest);
        builder.add_recipient(
            ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([9; 20])),
            amount,
        );
        builder
            .build(&BuildContext {
                network: NetworkType::Regtest,
                descriptors: pair,
                snapshot: &snapshot,
                change_index: 0,
            })
            .unwrap()
    }

    fn sign_and_finalize(template: &str) -> (Psbt, Transaction) {
        let pair = descriptors(template);
        let index = wallet(&pair);
        let created = build(&pair, &index, 90_000);
        let snapshot = index.snapshot();
        let result = Signer::new(&pair, snapshot.scripts())
            .sign(created.psbt.clone())
            .unwrap();
        assert!(result.finalized);
        let tx = finalize(result.psbt).unwrap();
        (created.psbt, tx)
    }

    fn assert_same_skeleton(psbt: &Psbt, tx: &Transaction) {
        let unsigned = &psbt.unsigned_tx;
        assert_eq!(tx.version, unsigned.version);
        assert_eq!(tx.lock_time, unsigned.lock_time);
        assert_eq!(tx.output, unsigned.output);
        assert_eq!(tx.input.len(), unsigned.input.len());
        for (signed, original) in tx.input.iter().zip(&unsigned.input) {
            assert_eq!(signed.previous_output, original.previous_output);
            assert_eq!(signed.sequence, original.sequence);
        }
    }

    #[test]
    fn test_sign_wpkh_verifies() {
        let (psbt, tx) = sign_and_finalize("wpkh(KEY)");
        assert_same_skeleton(&psbt, &tx);

        let secp = secp();
        let mut cache = SighashCache::new(&tx);
        for (i, input) in psbt.inputs.iter().enumerate() {
            let txout = input.witness_utxo.as_ref().unwrap();
            let witness = &tx.input[i].witness;
            assert_eq!(witness.len(), 2);
            let sig = ecdsa::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
            let pk = PublicKey::from_slice(witness.nth(1).unwrap()).unwrap();
            let sighash = cache
                .p2wpkh_signature_hash(i, &txout.script_pubkey, txout.value, EcdsaSighashType::All)
                .unwrap();
            let msg = Message::from_digest(sighash.to_byte_array());
            assert!(secp.verify_ecdsa(&msg, &sig.signature, &pk.inner).is_ok());
        }
    }

    #[test]
    fn test_sign_taproot_verifies() {
        let (psbt, tx) = sign_and_finalize("tr(KEY)");
        assert_same_skeleton(&psbt, &tx);

        let secp = secp();
        let prevouts: Vec<TxOut> = psbt
            .inputs
            .iter()
            .map(|i| i.witness_utxo.clone().unwrap())
            .collect();
        let mut cache = SighashCache::new(&tx);
        for (i, txout) in prevouts.iter().enumerate() {
            let witness = &tx.input[i].witness;
            assert_eq!(witness.len(), 1);
            let sig = schnorr::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
            let output_key = XOnlyPublicKey::from_slice(&txout.script_pubkey.as_bytes()[2..]).unwrap();
            let sighash = cache
                .taproot_key_spend_signature_hash(i, &Prevouts::All(&prevouts), TapSighashType::Default)
                .unwrap();
            let msg = Message::from_digest(sighash.to_byte_array());
            assert!(secp.verify_schnorr(&sig, &msg, &output_key).is_ok());
        }
    }

    #[test]
    fn test_sign_legacy_and_nested() {
        let (psbt, tx) = sign_and_finalize("pkh(KEY)");
        assert_same_skeleton(&psbt, &tx);
        assert!(tx.input.iter().all(|i| i.witness.is_empty() && !i.script_sig.is_empty()));

        let (psbt, tx) = sign_and_finalize("sh(wpkh(KEY))");
        assert_same_skeleton(&psbt, &tx);
        for input in &tx.input {
            assert_eq!(input.script_sig.len(), 23);
            assert_eq!(input.witness.len(), 2);
        }
    }

    #[test]
    fn test_watch_only_cannot_sign() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let created = build(&pair, &index, 50_000);

        let watch_only = DescriptorPair::parse(
            NetworkType::Regtest,
            &pair.external.to_public_string().unwrap(),
            Some(&pair.internal.as_ref().unwrap().to_public_string().unwrap()),
        )
        .unwrap();
        let snapshot = index.snapshot();
        let err = Signer::new(&watch_only, snapshot.scripts())
            .sign(created.psbt)
            .unwrap_err();
        assert!(matches!(err, Error::MissingPrivateKey(_)));
    }

    #[test]
    fn test_foreign_input_is_skipped() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let mut psbt = build(&pair, &index, 50_000).psbt;
        psbt.unsigned_tx.input.push(TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xee; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        });
        psbt.inputs.push(PsbtInput {
            witness_utxo: Some(TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([1; 20])),
            }),
            ..Default::default()
        });

        let snapshot = index.snapshot();
        let result = Signer::new(&pair, snapshot.scripts()).sign(psbt).unwrap();
        assert!(!result.finalized);
        let last = result.psbt.inputs.last().unwrap();
        assert!(last.partial_sigs.is_empty());
        assert!(last.final_script_witness.is_none());

        assert!(matches!(
            finalize(result.psbt),
            Err(Error::IncompleteSignatures(_))
        ));
    }

    #[test]
    fn test_finalize_unsigned_fails() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let created = build(&pair, &index, 50_000);
        assert!(matches!(
            finalize(created.psbt),
            Err(Error::IncompleteSignatures(_))
        ));
    }

    fn signed_unfinalized(pair: &DescriptorPair, index: &UtxoIndex) -> Psbt {
        let created = build(pair, index, 50_000);
        let snapshot = index.snapshot();
        let mut psbt = Signer::new(pair, snapshot.scripts())
            .sign(created.psbt.clone())
            .unwrap()
            .psbt;
        // put the signature back as a partial one
        for (signed, original) in psbt.inputs.iter_mut().zip(created.psbt.inputs) {
            let witness = signed.final_script_witness.take().unwrap();
            let sig = ecdsa::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
            let pk = PublicKey::from_slice(witness.nth(1).unwrap()).unwrap();
            *signed = original;
            signed.partial_sigs.insert(pk, sig);
        }
        psbt
    }

    #[test]
    fn test_finalize_accepts_valid_partial_sig() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let psbt = signed_unfinalized(&pair, &index);
        let tx = finalize(psbt).unwrap();
        assert!(tx.input.iter().all(|i| i.witness.len() == 2));
    }

    #[test]
    fn test_finalize_rejects_tampered_sig() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let mut psbt = signed_unfinalized(&pair, &index);
        let input = &mut psbt.inputs[0];
        let (pk, _) = input.partial_sigs.iter().next().map(|(k, v)| (*k, *v)).unwrap();
        let secret = pair.external.derive_secret_key(1).unwrap().unwrap();
        let wrong = secp().sign_ecdsa(&Message::from_digest([0x22; 32]), &secret);
        input.partial_sigs.insert(
            pk,
            ecdsa::Signature {
                signature: wrong,
                sighash_type: EcdsaSighashType::All,
            },
        );
        assert!(matches!(finalize(psbt), Err(Error::InvalidPsbt(_))));
    }

    #[test]
    fn test_finalize_ignores_foreign_sig() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let mut psbt = signed_unfinalized(&pair, &index);
        let foreign = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sig = ecdsa::Signature {
            signature: secp().sign_ecdsa(&Message::from_digest([0x33; 32]), &foreign),
            sighash_type: EcdsaSighashType::All,
        };
        let input = &mut psbt.inputs[0];
        input.partial_sigs.clear();
        input
            .partial_sigs
            .insert(PublicKey::new(foreign.public_key(secp())), sig);
        assert!(matches!(
            finalize(psbt),
            Err(Error::IncompleteSignatures(_))
        ));
    }

    #[test]
    fn test_sign_result_lifecycle() {
        let pair = descriptors("wpkh(KEY)");
        let index = wallet(&pair);
        let created = build(&pair, &index, 50_000);
        let snapshot = index.snapshot();
        let result = Signer::new(&pair, snapshot.scripts())
            .sign(created.psbt)
            .unwrap();
        assert_eq!(result.lifecycle(), TxLifecycle::Finalized);
        let partial = SignResult {
            psbt: result.psbt,
            finalized: false,
        };
        assert_eq!(partial.lifecycle(), TxLifecycle::PartiallySigned);
    }
}
