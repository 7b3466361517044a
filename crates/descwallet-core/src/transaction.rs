//! Transaction builder
//!
//! Turns recipients and spending options into an unsigned PSBT. Building reads
//! one immutable index snapshot and never modifies it; the caller decides
//! whether to reveal the change index once the PSBT is handed out.

use crate::descriptor::{Descriptor, DescriptorPair, ScriptTemplate};
use crate::fees::{input_weight, output_weight, FeeCalculator, FeeRate};
use crate::index::IndexSnapshot;
use crate::selection::{
    CoinSelector, SelectionStrategy, SelectionTarget, UtxoSelector, WeightedUtxo,
};
use crate::types::{KeychainKind, TransactionDetails, Utxo};
use crate::{Error, Result};
use bitcoin::absolute::LockTime;
use bitcoin::psbt::{Input as PsbtInput, Output as PsbtOutput, Psbt};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use descwallet_params::{NetworkType, RelayPolicy};
use std::collections::BTreeSet;

/// Payment to one output script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Output script
    pub script_pubkey: ScriptBuf,
    /// Amount in satoshis, ignored with send-all
    pub amount: u64,
}

/// Wallet state the builder reads
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Wallet network
    pub network: NetworkType,
    /// Wallet descriptors
    pub descriptors: &'a DescriptorPair,
    /// Index snapshot to select from
    pub snapshot: &'a IndexSnapshot,
    /// Derivation index a change output would use
    pub change_index: u32,
}

/// Unsigned transaction and its wallet-centric summary
#[derive(Debug, Clone)]
pub struct CreateTxResult {
    /// Summary; `transaction` holds the unsigned transaction
    pub details: TransactionDetails,
    /// PSBT ready for signing
    pub psbt: Psbt,
    /// Keychain and index of the change output, when one was added
    pub change: Option<(KeychainKind, u32)>,
}

/// Transaction builder
#[derive(Debug, Clone)]
pub struct TxBuilder {
    recipients: Vec<Recipient>,
    fee_rate: FeeRate,
    strategy: SelectionStrategy,
    send_all: bool,
    must_spend: Vec<OutPoint>,
    unspendable: BTreeSet<OutPoint>,
    policy: RelayPolicy,
}

impl TxBuilder {
    /// Create a builder with the relay policy of `network`
    pub fn new(network: NetworkType) -> Self {
        Self {
            recipients: Vec::new(),
            fee_rate: FeeRate::default(),
            strategy: SelectionStrategy::default(),
            send_all: false,
            must_spend: Vec::new(),
            unspendable: BTreeSet::new(),
            policy: RelayPolicy::from_network(network),
        }
    }

    /// Add a payment
    pub fn add_recipient(&mut self, script_pubkey: ScriptBuf, amount: u64) -> &mut Self {
        self.recipients.push(Recipient {
            script_pubkey,
            amount,
        });
        self
    }

    /// Set the fee rate
    pub fn fee_rate(&mut self, rate: FeeRate) -> &mut Self {
        self.fee_rate = rate;
        self
    }

    /// Set the coin selection strategy
    pub fn strategy(&mut self, strategy: SelectionStrategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    /// Pay everything, minus the fee, to the single recipient
    ///
    /// Drains the must-spend outputs when any are set, the whole wallet
    /// otherwise.
    pub fn send_all(&mut self) -> &mut Self {
        self.send_all = true;
        self
    }

    /// Always spend these outputs
    pub fn add_utxos(&mut self, outpoints: impl IntoIterator<Item = OutPoint>) -> &mut Self {
        for outpoint in outpoints {
            if !self.must_spend.contains(&outpoint) {
                self.must_spend.push(outpoint);
            }
        }
        self
    }

    /// Never spend these outputs
    pub fn add_unspendable(&mut self, outpoints: impl IntoIterator<Item = OutPoint>) -> &mut Self {
        self.unspendable.extend(outpoints);
        self
    }

    /// Number of recipients
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    /// Select inputs, compute fee and change, and produce an unsigned PSBT
    pub fn build(&self, ctx: &BuildContext<'_>) -> Result<CreateTxResult> {
        let calculator = FeeCalculator::new(self.policy.clone());
        let rate = calculator.validate_fee_rate(self.fee_rate)?;
        self.validate_recipients(&calculator)?;

        let weighted = |utxo: Utxo| WeightedUtxo {
            input_weight: input_weight(ctx.descriptors.for_keychain(utxo.keychain).template()),
            utxo,
        };

        let mut must_use = Vec::with_capacity(self.must_spend.len());
        for outpoint in &self.must_spend {
            if self.unspendable.contains(outpoint) {
                return Err(Error::InvalidTransaction(format!(
                    "{} is both required and unspendable",
                    outpoint
                )));
            }
            let utxo = ctx.snapshot.spendable_utxo(outpoint).ok_or_else(|| {
                Error::InvalidTransaction(format!("{} is not a spendable wallet output", outpoint))
            })?;
            must_use.push(weighted(utxo));
        }
        let candidates: Vec<WeightedUtxo> = ctx
            .snapshot
            .spendable()
            .filter(|u| !self.unspendable.contains(&u.outpoint))
            .filter(|u| !self.must_spend.contains(&u.outpoint))
            .map(weighted)
            .collect();

        let segwit = ctx.descriptors.external.template().is_segwit()
            || ctx
                .descriptors
                .internal
                .as_ref()
                .is_some_and(|d| d.template().is_segwit());
        let recipient_lens: Vec<usize> =
            self.recipients.iter().map(|r| r.script_pubkey.len()).collect();
        let base_fee = rate.fee_for_weight(calculator.base_weight(&recipient_lens, segwit));

        let change_keychain = ctx.descriptors.change_keychain();
        let change_descriptor = ctx.descriptors.for_keychain(change_keychain);
        let change_script = change_descriptor
            .derive_script(ctx.change_index, ctx.network)?
            .script_pubkey;
        let change_output_fee = rate.fee_for_weight(output_weight(change_script.len()));
        let change_dust = calculator.dust_threshold(change_script.len(), change_descriptor.template());

        let (selected, outputs, fee, change) = if self.send_all {
            let selected = if must_use.is_empty() {
                candidates
            } else {
                must_use
            };
            if selected.is_empty() {
                return Err(Error::InsufficientFunds {
                    needed: base_fee,
                    available: 0,
                });
            }
            let total = sum_values(&selected)?;
            let fee = base_fee + selected.iter().map(|u| u.input_fee(rate)).sum::<u64>();
            let recipient = &self.recipients[0];
            let dust = calculator.dust_threshold(
                recipient.script_pubkey.len(),
                spend_template_for(&recipient.script_pubkey),
            );
            let needed = fee.saturating_add(dust);
            if total < needed {
                return Err(Error::InsufficientFunds {
                    needed,
                    available: total,
                });
            }
            let output = TxOut {
                value: Amount::from_sat(total - fee),
                script_pubkey: recipient.script_pubkey.clone(),
            };
            (selected, vec![output], fee, None)
        } else {
            let amount = self.recipients.iter().try_fold(0u64, |acc, r| {
                acc.checked_add(r.amount)
                    .ok_or_else(|| Error::AmountOverflow("recipient total".to_string()))
            })?;
            let target = SelectionTarget {
                amount,
                base_fee,
                fee_rate: rate,
                cost_of_change: change_output_fee
                    + rate.fee_for_weight(input_weight(change_descriptor.template())),
            };
            let selection = UtxoSelector::new(self.strategy).select(must_use, candidates, &target)?;

            let mut outputs: Vec<TxOut> = self
                .recipients
                .iter()
                .map(|r| TxOut {
                    value: Amount::from_sat(r.amount),
                    script_pubkey: r.script_pubkey.clone(),
                })
                .collect();

            let change_value = selection.excess.saturating_sub(change_output_fee);
            let (fee, change) = if selection.excess > change_output_fee && change_value >= change_dust
            {
                outputs.push(TxOut {
                    value: Amount::from_sat(change_value),
                    script_pubkey: change_script.clone(),
                });
                (selection.fee + change_output_fee, Some((change_keychain, ctx.change_index)))
            } else {
                // below dust: the excess goes to the miner
                (selection.fee + selection.excess, None)
            };
            (selection.selected, outputs, fee, change)
        };

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: selected
                .iter()
                .map(|u| TxIn {
                    previous_output: u.utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        let mut psbt = Psbt::from_unsigned_tx(tx.clone())?;
        for (psbt_input, weighted) in psbt.inputs.iter_mut().zip(&selected) {
            let utxo = &weighted.utxo;
            let descriptor = ctx.descriptors.for_keychain(utxo.keychain);
            fill_input(psbt_input, descriptor, utxo, ctx.snapshot)?;
        }
        if let Some((keychain, index)) = change {
            if let Some(psbt_output) = psbt.outputs.last_mut() {
                fill_output(psbt_output, ctx.descriptors.for_keychain(keychain), index)?;
            }
        }

        let sent = sum_values(&selected)?;
        let received = tx
            .output
            .iter()
            .filter(|o| {
                ctx.snapshot.scripts().contains_key(&o.script_pubkey)
                    || (change.is_some() && o.script_pubkey == change_script)
            })
            .map(|o| o.value.to_sat())
            .sum();
        let details = TransactionDetails {
            txid: tx.compute_txid(),
            transaction: Some(tx),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            received,
            sent,
            fee: Some(fee),
            height: None,
        };

        tracing::info!(
            "Built transaction {}: {} inputs, {} outputs, fee {} sat",
            details.txid,
            psbt.inputs.len(),
            psbt.outputs.len(),
            fee
        );
        Ok(CreateTxResult {
            details,
            psbt,
            change,
        })
    }

    fn validate_recipients(&self, calculator: &FeeCalculator) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(Error::InvalidTransaction("no recipients".to_string()));
        }
        if self.send_all {
            if self.recipients.len() != 1 {
                return Err(Error::InvalidTransaction(
                    "send-all requires exactly one recipient".to_string(),
                ));
            }
            return Ok(());
        }
        for recipient in &self.recipients {
            if !self.policy.is_valid_amount(recipient.amount) || recipient.amount == 0 {
                return Err(Error::InvalidAmount(format!(
                    "{} sat is not a valid amount",
                    recipient.amount
                )));
            }
            let dust = calculator.dust_threshold(
                recipient.script_pubkey.len(),
                spend_template_for(&recipient.script_pubkey),
            );
            if recipient.amount < dust {
                return Err(Error::InvalidAmount(format!(
                    "{} sat is below the dust limit of {} sat",
                    recipient.amount, dust
                )));
            }
        }
        Ok(())
    }
}

/// Template an output script is most likely spent with
fn spend_template_for(script: &ScriptBuf) -> ScriptTemplate {
    if script.is_p2pkh() {
        ScriptTemplate::Pkh
    } else if script.is_p2sh() {
        ScriptTemplate::ShWpkh
    } else if script.is_p2tr() {
        ScriptTemplate::Tr
    } else {
        ScriptTemplate::Wpkh
    }
}

fn fill_input(
    input: &mut PsbtInput,
    descriptor: &Descriptor,
    utxo: &Utxo,
    snapshot: &IndexSnapshot,
) -> Result<()> {
    let index = utxo.derivation_index;
    let template = descriptor.template();
    if template.is_segwit() {
        input.witness_utxo = Some(utxo.txout.clone());
    } else {
        let prev = snapshot.transaction(&utxo.outpoint.txid).ok_or_else(|| {
            Error::InvalidTransaction(format!("previous transaction of {} missing", utxo.outpoint))
        })?;
        input.non_witness_utxo = Some(Transaction::clone(&prev.tx));
    }
    input.redeem_script = descriptor.redeem_script(index)?;

    let source = descriptor.key_origin(index)?;
    let pk = descriptor.derive_public_key(index)?;
    if template == ScriptTemplate::Tr {
        let (internal_key, _) = pk.0.x_only_public_key();
        input.tap_internal_key = Some(internal_key);
        input.tap_key_origins.insert(internal_key, (Vec::new(), source));
    } else {
        input.bip32_derivation.insert(pk.0, source);
    }
    Ok(())
}

fn fill_output(output: &mut PsbtOutput, descriptor: &Descriptor, index: u32) -> Result<()> {
    let source = descriptor.key_origin(index)?;
    let pk = descriptor.derive_public_key(index)?;
    output.redeem_script = descriptor.redeem_script(index)?;
    if descriptor.template() == ScriptTemplate::Tr {
        let (internal_key, _) = pk.0.x_only_public_key();
        output.tap_internal_key = Some(internal_key);
        output.tap_key_origins.insert(internal_key, (Vec::new(), source));
    } else {
        output.bip32_derivation.insert(pk.0, source);
    }
    Ok(())
}

fn sum_values(utxos: &[WeightedUtxo]) -> Result<u64> {
    utxos.iter().try_fold(0u64, |acc, u| {
        acc.checked_add(u.utxo.value())
            .ok_or_else(|| Error::AmountOverflow("input total".to_string()))
    })
}
