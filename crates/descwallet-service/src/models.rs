//! Boundary data models
//!
//! Everything here is plain serde data. Scripts and raw transactions travel as
//! hex, PSBTs as base64, outpoints as `txid:vout`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::consensus::encode;
use bitcoin::psbt::Psbt;
use bitcoin::{Address, OutPoint, Transaction};
use descwallet_core::{
    Error, KeychainKind, PendingSpendPolicy, Result, RotationPolicy, SelectionStrategy,
    TransactionDetails, Utxo,
};
use descwallet_params::{Network, NetworkType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Parameters for opening a wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConstructor {
    /// Wallet name; the database file is `<path>/<name>.sqlite`
    pub name: String,
    /// Network of the descriptors
    pub network: NetworkType,
    /// Storage directory
    pub path: PathBuf,
    /// Receive descriptor
    pub descriptor: String,
    /// Change descriptor
    #[serde(default)]
    pub change_descriptor: Option<String>,
    /// Electrum endpoint, `tcp://host:port`
    pub electrum_url: String,
    /// SOCKS5 proxy for the Electrum connection
    #[serde(default)]
    pub electrum_proxy: Option<String>,
    /// Balance policy for unconfirmed spends
    #[serde(default)]
    pub pending_spend_policy: Option<PendingSpendPolicy>,
    /// Address rotation policy
    #[serde(default)]
    pub rotation_policy: Option<RotationPolicy>,
    /// Unused addresses watched past the last active one
    #[serde(default)]
    pub gap_limit: Option<u32>,
}

/// Output script and value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutView {
    /// Hex script
    pub script_pubkey: String,
    /// Satoshis
    pub value: u64,
}

/// Unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoView {
    /// `txid:vout`
    pub outpoint: String,
    /// Script and value
    pub txout: TxOutView,
    /// Owning keychain
    pub keychain: KeychainKind,
    /// Whether it pays to a change address
    pub is_internal: bool,
    /// Derivation index of the owning script
    pub derivation_index: u32,
    /// Confirmation height, absent while unconfirmed
    pub confirmation_height: Option<u32>,
}

impl From<&Utxo> for UtxoView {
    fn from(utxo: &Utxo) -> Self {
        Self {
            outpoint: utxo.outpoint.to_string(),
            txout: TxOutView {
                script_pubkey: utxo.txout.script_pubkey.to_hex_string(),
                value: utxo.value(),
            },
            keychain: utxo.keychain,
            is_internal: utxo.is_internal(),
            derivation_index: utxo.derivation_index,
            confirmation_height: utxo.confirmation_height,
        }
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInView {
    /// Spent outpoint, `txid:vout`
    pub previous_output: String,
    /// Hex scriptSig
    pub script_sig: String,
    /// nSequence
    pub sequence: u32,
    /// Hex witness stack items
    pub witness: Vec<String>,
}

/// Typed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    /// Transaction version
    pub version: i32,
    /// nLockTime
    pub lock_time: u32,
    /// Inputs in order
    pub inputs: Vec<TxInView>,
    /// Outputs in order
    pub outputs: Vec<TxOutView>,
    /// Consensus hex
    pub hex: String,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            version: tx.version.0,
            lock_time: tx.lock_time.to_consensus_u32(),
            inputs: tx
                .input
                .iter()
                .map(|input| TxInView {
                    previous_output: input.previous_output.to_string(),
                    script_sig: input.script_sig.to_hex_string(),
                    sequence: input.sequence.0,
                    witness: input.witness.iter().map(hex::encode).collect(),
                })
                .collect(),
            outputs: tx
                .output
                .iter()
                .map(|output| TxOutView {
                    script_pubkey: output.script_pubkey.to_hex_string(),
                    value: output.value.to_sat(),
                })
                .collect(),
            hex: encode::serialize_hex(tx),
        }
    }
}

/// Transaction summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetailsView {
    /// Transaction id
    pub txid: String,
    /// Full transaction when requested
    pub transaction: Option<TransactionView>,
    /// Unix seconds
    pub timestamp: u64,
    /// Satoshis received by the wallet
    pub received: u64,
    /// Satoshis spent from the wallet
    pub sent: u64,
    /// Fee, absent when an input is unknown
    pub fee: Option<u64>,
    /// Confirmation height, absent while unconfirmed
    pub height: Option<u32>,
}

impl From<&TransactionDetails> for TransactionDetailsView {
    fn from(details: &TransactionDetails) -> Self {
        Self {
            txid: details.txid.to_string(),
            transaction: details.transaction.as_ref().map(TransactionView::from),
            timestamp: details.timestamp,
            received: details.received,
            sent: details.sent,
            fee: details.fee,
            height: details.height,
        }
    }
}

/// One payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAmount {
    /// Destination address
    pub address: String,
    /// Satoshis; ignored with `send_all`
    pub amount: u64,
}

/// Parameters for building a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTxRequest {
    /// Fee rate in sat/vB
    pub fee_rate: f32,
    /// Payments
    pub addressees: Vec<AddressAmount>,
    /// Spend everything to the single addressee
    #[serde(default)]
    pub send_all: bool,
    /// Outpoints that must be spent
    #[serde(default)]
    pub utxos: Option<Vec<String>>,
    /// Outpoints that must not be spent
    #[serde(default)]
    pub unspendable: Option<Vec<String>>,
    /// Coin selection strategy
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
}

/// Unsigned transaction and its summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTxResponse {
    /// Summary with the fee that will be paid
    pub details: TransactionDetailsView,
    /// Base64 PSBT
    pub psbt: String,
}

/// Signing result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    /// Base64 PSBT
    pub psbt: String,
    /// Whether every input is final
    pub finalized: bool,
}

/// Network transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    /// Consensus hex
    pub transaction: String,
    /// Transaction id
    pub txid: String,
}

/// Broadcast result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResponse {
    /// Transaction id
    pub txid: String,
}

/// Public descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDescriptors {
    /// Receive descriptor
    pub external: String,
    /// Change descriptor
    pub internal: Option<String>,
}

/// Result of one sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Chain tip after the sync
    pub tip_height: u32,
    /// Unspent outputs that appeared
    pub new_utxos: usize,
    /// Transactions added or changed
    pub updated_transactions: usize,
    /// Unconfirmed transactions dropped as replaced or no longer in the mempool
    #[serde(default)]
    pub evicted_transactions: usize,
    /// Balance after the sync
    pub balance: u64,
}

/// Balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Satoshis
    pub balance: u64,
}

/// Parse an address and check it belongs to `network`
pub fn parse_address(address: &str, network: NetworkType) -> Result<Address> {
    let unchecked = Address::from_str(address.trim())
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;
    unchecked
        .require_network(Network::from_type(network).bitcoin_network())
        .map_err(|_| Error::NetworkMismatch(format!("{} is not a {} address", address, network)))
}

/// Parse `txid:vout`
pub fn parse_outpoint(outpoint: &str) -> Result<OutPoint> {
    OutPoint::from_str(outpoint.trim())
        .map_err(|e| Error::InvalidTransaction(format!("outpoint {}: {}", outpoint, e)))
}

/// Decode a base64 PSBT
pub fn decode_psbt(encoded: &str) -> Result<Psbt> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidPsbt(format!("base64: {}", e)))?;
    Ok(Psbt::deserialize(&bytes)?)
}

/// Encode a PSBT as base64
pub fn encode_psbt(psbt: &Psbt) -> String {
    BASE64.encode(psbt.serialize())
}

/// Decode a consensus-hex transaction
pub fn decode_transaction(raw: &str) -> Result<Transaction> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| Error::InvalidTransaction(format!("hex: {}", e)))?;
    encode::deserialize(&bytes).map_err(|e| Error::InvalidTransaction(e.to_string()))
}
