//! JSON request dispatcher
//!
//! One string in, one string out. A request names its operation in `method`
//! and carries its arguments in `params`:
//!
//! ```json
//! {"method": "get_balance", "params": {"wallet": 1}}
//! ```
//!
//! Failures come back as `{"error": "...", "code": N}` where `N` is the
//! wallet error code, or one of the negative dispatcher codes.

use crate::models::{BalanceResponse, BroadcastResponse, CreateTxRequest, WalletConstructor};
use crate::service::{WalletHandle, WalletService};
use descwallet_core::DEFAULT_WORD_COUNT;
use descwallet_params::NetworkType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Request JSON could not be decoded
pub const MALFORMED_REQUEST_CODE: i32 = -1003;

/// Response could not be encoded
pub const SERIALIZATION_FAILED_CODE: i32 = -1004;

/// Boundary request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Open a wallet
    Constructor(WalletConstructor),
    /// Close a wallet
    Destructor {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Scan the chain
    Sync {
        /// Wallet handle
        wallet: WalletHandle,
        /// Minimum number of indices to scan per keychain
        #[serde(default)]
        max_address: Option<u32>,
    },
    /// Cancel a running sync
    CancelSync {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Reveal the next receive address
    GetNewAddress {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Balance in satoshis
    GetBalance {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Unspent outputs
    ListUnspent {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Transaction summaries
    ListTransactions {
        /// Wallet handle
        wallet: WalletHandle,
        /// Include full transactions
        #[serde(default)]
        include_raw: bool,
    },
    /// Fresh mnemonic and master keys
    GenerateExtendedKey {
        /// Target network
        network: NetworkType,
        /// Mnemonic length
        #[serde(default = "default_word_count")]
        word_count: usize,
    },
    /// Master keys of an existing mnemonic
    CreateExtendedKeys {
        /// Target network
        network: NetworkType,
        /// Mnemonic words
        mnemonic: String,
    },
    /// Build an unsigned transaction
    CreateTransaction(CreateTransactionParams),
    /// Sign a base64 PSBT
    Sign {
        /// Wallet handle
        wallet: WalletHandle,
        /// Base64 PSBT
        psbt: String,
    },
    /// Extract the network transaction from a signed PSBT
    Finalize {
        /// Base64 PSBT
        psbt: String,
    },
    /// Send a raw transaction
    Broadcast {
        /// Wallet handle
        wallet: WalletHandle,
        /// Consensus hex
        transaction: String,
    },
    /// Descriptors without private keys
    PublicDescriptors {
        /// Wallet handle
        wallet: WalletHandle,
    },
    /// Unconfirm transactions at or above a height
    Reorg {
        /// Wallet handle
        wallet: WalletHandle,
        /// First height no longer in the best chain
        from_height: u32,
    },
}

/// Parameters of [`Request::CreateTransaction`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionParams {
    /// Wallet handle
    pub wallet: WalletHandle,
    /// Payments and options
    #[serde(flatten)]
    pub request: CreateTxRequest,
}

fn default_word_count() -> usize {
    DEFAULT_WORD_COUNT
}

impl Request {
    /// Wire name of the operation
    pub fn method(&self) -> &'static str {
        match self {
            Request::Constructor(_) => "constructor",
            Request::Destructor { .. } => "destructor",
            Request::Sync { .. } => "sync",
            Request::CancelSync { .. } => "cancel_sync",
            Request::GetNewAddress { .. } => "get_new_address",
            Request::GetBalance { .. } => "get_balance",
            Request::ListUnspent { .. } => "list_unspent",
            Request::ListTransactions { .. } => "list_transactions",
            Request::GenerateExtendedKey { .. } => "generate_extended_key",
            Request::CreateExtendedKeys { .. } => "create_extended_keys",
            Request::CreateTransaction(_) => "create_transaction",
            Request::Sign { .. } => "sign",
            Request::Finalize { .. } => "finalize",
            Request::Broadcast { .. } => "broadcast",
            Request::PublicDescriptors { .. } => "public_descriptors",
            Request::Reorg { .. } => "reorg",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: i32,
}

fn error_json(error: String, code: i32) -> String {
    serde_json::to_string(&ErrorResponse { error, code }).unwrap_or_else(|_| {
        format!(
            "{{\"error\": \"Can't serialize error\", \"code\": {}}}",
            SERIALIZATION_FAILED_CODE
        )
    })
}

fn to_value<T: Serialize>(value: T) -> descwallet_core::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(service: &WalletService, request: Request) -> descwallet_core::Result<Value> {
    match request {
        Request::Constructor(params) => to_value(service.constructor(params)?),
        Request::Destructor { wallet } => {
            service.destructor(wallet)?;
            Ok(Value::Null)
        }
        Request::Sync {
            wallet,
            max_address,
        } => to_value(service.sync(wallet, max_address).await?),
        Request::CancelSync { wallet } => to_value(service.cancel_sync(wallet)?),
        Request::GetNewAddress { wallet } => to_value(service.get_new_address(wallet)?),
        Request::GetBalance { wallet } => to_value(BalanceResponse {
            balance: service.get_balance(wallet)?,
        }),
        Request::ListUnspent { wallet } => to_value(service.list_unspent(wallet)?),
        Request::ListTransactions {
            wallet,
            include_raw,
        } => to_value(service.list_transactions(wallet, include_raw)?),
        Request::GenerateExtendedKey {
            network,
            word_count,
        } => to_value(WalletService::generate_extended_key(network, word_count)?),
        Request::CreateExtendedKeys { network, mnemonic } => {
            to_value(WalletService::create_extended_keys(network, &mnemonic)?)
        }
        Request::CreateTransaction(params) => {
            to_value(service.create_transaction(params.wallet, &params.request)?)
        }
        Request::Sign { wallet, psbt } => to_value(service.sign(wallet, &psbt)?),
        Request::Finalize { psbt } => to_value(WalletService::finalize(&psbt)?),
        Request::Broadcast {
            wallet,
            transaction,
        } => to_value(BroadcastResponse {
            txid: service.broadcast(wallet, &transaction).await?,
        }),
        Request::PublicDescriptors { wallet } => to_value(service.public_descriptors(wallet)?),
        Request::Reorg {
            wallet,
            from_height,
        } => to_value(service.reorg(wallet, from_height)?),
    }
}

/// Decode `request`, run it against `service` and encode the result
pub async fn dispatch(service: &WalletService, request: &str) -> String {
    let request = match serde_json::from_str::<Request>(request) {
        Ok(request) => request,
        Err(e) => {
            return error_json(
                format!("Cannot deserialize input: {}", e),
                MALFORMED_REQUEST_CODE,
            )
        }
    };

    let method = request.method();
    debug!("Dispatching {}", method);
    match execute(service, request).await {
        Ok(value) => serde_json::to_string(&value)
            .unwrap_or_else(|e| error_json(e.to_string(), SERIALIZATION_FAILED_CODE)),
        Err(e) => {
            debug!("{} failed: {}", method, e);
            error_json(e.user_message(), e.code())
        }
    }
}
