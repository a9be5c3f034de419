use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use crate::blockchain::chain::BlockchainError;
use crate::blockchain::transaction::{Transaction, TransactionError, TxInput, TxOutput};
use crate::blockchain::{Address, Block, BlockStore, Blockchain, Wallet};

/// Shared application state: the store location and the (single-writer)
/// ledger, `None` until the ledger has been initialized.
pub struct AppState {
    pub data_dir: PathBuf,
    pub ledger: Mutex<Option<Blockchain>>,
}

/// Data structure handed to every handler
pub type LedgerData = web::Data<AppState>;

/// A transaction input, hex encoded for transport
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TxInputResponse {
    /// Id of the referenced transaction
    pub prev_tx_id: String,

    /// Index of the referenced output (-1 for coinbase)
    pub out_index: i32,

    /// Signature over the per-input signing digest
    pub signature: String,

    /// The spender's public key, or coinbase data
    pub pub_key: String,
}

/// A transaction output, hex encoded for transport
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TxOutputResponse {
    /// The amount held by this output
    pub value: u64,

    /// Digest of the public key this output is locked to
    pub pub_key_hash: String,
}

/// A transaction, hex encoded for transport
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The transaction id
    pub id: String,

    pub inputs: Vec<TxInputResponse>,

    pub outputs: Vec<TxOutputResponse>,
}

/// A block, hex encoded for transport
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    /// Proof-of-work digest of the block
    pub hash: String,

    /// Hash of the previous block, empty for genesis
    pub prev_hash: String,

    /// Nonce found by the proof-of-work search
    pub nonce: u64,

    pub transactions: Vec<TransactionResponse>,
}

impl From<&TxInput> for TxInputResponse {
    fn from(input: &TxInput) -> Self {
        TxInputResponse {
            prev_tx_id: hex::encode(&input.prev_tx_id),
            out_index: input.out_index,
            signature: hex::encode(&input.signature),
            pub_key: hex::encode(&input.pub_key),
        }
    }
}

impl From<&TxOutput> for TxOutputResponse {
    fn from(output: &TxOutput) -> Self {
        TxOutputResponse {
            value: output.value,
            pub_key_hash: hex::encode(&output.pub_key_hash),
        }
    }
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        TransactionResponse {
            id: hex::encode(&tx.id),
            inputs: tx.inputs.iter().map(TxInputResponse::from).collect(),
            outputs: tx.outputs.iter().map(TxOutputResponse::from).collect(),
        }
    }
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        BlockResponse {
            hash: hex::encode(&block.hash),
            prev_hash: hex::encode(&block.prev_hash),
            nonce: block.nonce,
            transactions: block
                .transactions
                .iter()
                .map(TransactionResponse::from)
                .collect(),
        }
    }
}

/// Request for the init endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct InitRequest {
    /// The address receiving the genesis coinbase
    pub address: String,
}

/// Response for the init endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct InitResponse {
    /// The message
    pub message: String,

    /// Hash of the genesis block
    pub tip: String,
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain, tip first
    pub blocks: Vec<BlockResponse>,

    /// Whether every block passes proof-of-work validation
    pub is_valid: bool,
}

/// Request for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendRequest {
    /// The sender's address
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    pub amount: u64,

    /// The sender's private key (for signing)
    pub private_key: String,
}

/// Response for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    /// The message
    pub message: String,

    /// The block sealing the payment
    pub block: BlockResponse,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

fn not_initialized() -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": "Ledger not initialized"
    }))
}

/// Initialize the ledger
///
/// Seals a genesis block paying the subsidy to the given address
#[utoipa::path(
    post,
    path = "/api/v1/init",
    request_body = InitRequest,
    responses(
        (status = 201, description = "Ledger initialized", body = InitResponse),
        (status = 400, description = "Invalid address"),
        (status = 409, description = "Ledger already initialized"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn init_ledger(
    state: LedgerData,
    init_req: web::Json<InitRequest>,
) -> impl Responder {
    let address = match Address::from_str(&init_req.address) {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid address: {}", err)
            }));
        }
    };

    let mut ledger = state.ledger.lock().unwrap();
    if ledger.is_some() {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": "Ledger already initialized"
        }));
    }

    let store = match BlockStore::new(&state.data_dir) {
        Ok(store) => store,
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to open block store: {}", err)
            }));
        }
    };

    match Blockchain::init(store, &address) {
        Ok(chain) => {
            let tip = hex::encode(chain.tip());
            *ledger = Some(chain);

            HttpResponse::Created().json(InitResponse {
                message: "Ledger initialized".to_string(),
                tip,
            })
        }
        Err(BlockchainError::AlreadyInitialized) => {
            HttpResponse::Conflict().json(serde_json::json!({
                "error": "Ledger already initialized"
            }))
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to initialize ledger: {}", err)
        })),
    }
}

/// Get the full chain
///
/// Returns every block from the tip back to genesis, with a validity flag
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse),
        (status = 400, description = "Ledger not initialized"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(state: LedgerData) -> impl Responder {
    let ledger = state.ledger.lock().unwrap();
    let chain = match ledger.as_ref() {
        Some(chain) => chain,
        None => return not_initialized(),
    };

    let blocks = match chain.blocks() {
        Ok(blocks) => blocks,
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to walk chain: {}", err)
            }));
        }
    };
    let is_valid = match chain.validate() {
        Ok(is_valid) => is_valid,
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to validate chain: {}", err)
            }));
        }
    };

    HttpResponse::Ok().json(ChainResponse {
        length: blocks.len(),
        blocks: blocks.iter().map(BlockResponse::from).collect(),
        is_valid,
    })
}

/// Check if the chain is valid
///
/// Re-runs proof-of-work validation over every block
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool),
        (status = 400, description = "Ledger not initialized")
    )
)]
pub async fn validate_chain(state: LedgerData) -> impl Responder {
    let ledger = state.ledger.lock().unwrap();
    let chain = match ledger.as_ref() {
        Some(chain) => chain,
        None => return not_initialized(),
    };

    match chain.validate() {
        Ok(is_valid) => HttpResponse::Ok().json(is_valid),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to validate chain: {}", err)
        })),
    }
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Get wallet balance
///
/// Returns the sum of the address's unspent outputs
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    responses(
        (status = 200, description = "Wallet balance retrieved successfully"),
        (status = 400, description = "Invalid address or ledger not initialized"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_balance(state: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = match Address::from_str(&address.into_inner()) {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid address: {}", err)
            }));
        }
    };
    let pub_key_hash = match address.pub_key_hash() {
        Ok(hash) => hash,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid address: {}", err)
            }));
        }
    };

    let ledger = state.ledger.lock().unwrap();
    let chain = match ledger.as_ref() {
        Some(chain) => chain,
        None => return not_initialized(),
    };

    match chain.balance(&pub_key_hash) {
        Ok(balance) => HttpResponse::Ok().json(serde_json::json!({
            "address": address.0,
            "balance": balance
        })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to compute balance: {}", err)
        })),
    }
}

/// Send a payment
///
/// Builds, signs, and seals a payment into a new block
#[utoipa::path(
    post,
    path = "/api/v1/transactions/send",
    request_body = SendRequest,
    responses(
        (status = 201, description = "Payment sealed into a new block", body = SendResponse),
        (status = 400, description = "Invalid request or insufficient funds"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn send(state: LedgerData, send_req: web::Json<SendRequest>) -> impl Responder {
    let private_key_bytes = match hex::decode(&send_req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid private key format. Must be a hex string."
            }));
        }
    };

    let wallet = match Wallet::from_secret_key(&private_key_bytes) {
        Ok(wallet) => wallet,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid private key: {}", err)
            }));
        }
    };

    // The key in the request must be the key behind the sender address
    if wallet.address().0 != send_req.from {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Private key does not match sender address"
        }));
    }

    let to_address = match Address::from_str(&send_req.to) {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid recipient address: {}", err)
            }));
        }
    };

    let mut ledger = state.ledger.lock().unwrap();
    let chain = match ledger.as_mut() {
        Some(chain) => chain,
        None => return not_initialized(),
    };

    let tx = match Transaction::build_payment(&wallet, &to_address, send_req.amount, chain) {
        Ok(tx) => tx,
        Err(BlockchainError::TransactionError(TransactionError::InsufficientFunds {
            requested,
            accumulated,
        })) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!(
                    "Insufficient funds: requested {}, accumulated {}",
                    requested, accumulated
                ),
                "requested": requested,
                "accumulated": accumulated
            }));
        }
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to build payment: {}", err)
            }));
        }
    };

    match chain.add_block(vec![tx]) {
        Ok(block) => HttpResponse::Created().json(SendResponse {
            message: "Payment sealed into a new block".to_string(),
            block: BlockResponse::from(&block),
        }),
        Err(BlockchainError::InvalidTransaction(tx_id)) => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Transaction {} failed verification", tx_id)
            }))
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to seal block: {}", err)
        })),
    }
}
