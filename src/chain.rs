//! The narrow chain interface the wallet consumes.
//!
//! Every call is a blocking request/response; the engine deliberately has
//! no async surface. Block add/revert events arrive as [`BlockDetail`]
//! values pushed into the wallet by whatever drives the node connection.

use serde::{Deserialize, Serialize};

use crate::{
    error::WalletError,
    types::{Tx, TxHash, UtxoBasic},
};

/// Height and timestamp of the chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHeader {
    pub height: i64,
    /// Block timestamp, seconds since the epoch.
    pub block_time: i64,
}

/// A transaction as the chain reports it: position plus execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxDetail {
    pub tx: Tx,
    pub height: i64,
    pub index: u32,
    /// Whether the receipt reports successful execution.
    pub exec_ok: bool,
}

/// One confirmed or reverted block, delivered to the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDetail {
    pub header: ChainHeader,
    pub txs: Vec<TxDetail>,
}

/// Cursor-paged request for transactions touching an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxListRequest {
    pub addr: String,
    pub flag: i32,
    pub direction: i32,
    pub count: i32,
    /// Resume height; `-1` starts from the chain tip.
    pub height: i64,
    pub index: i64,
}

/// One entry of a paged transaction listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSummary {
    pub tx_hash: TxHash,
    pub height: i64,
    pub index: i64,
}

/// Decoy candidates of one denomination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountDecoys {
    pub amount: u64,
    pub utxos: Vec<UtxoBasic>,
}

/// Blocking chain access.
pub trait ChainClient: Send {
    /// Submit a signed transaction; returns its hash on acceptance.
    fn send_tx(&self, tx: &Tx) -> Result<TxHash, WalletError>;

    /// Look a transaction up by hash. `None` means the chain does not
    /// know it.
    fn query_tx(&self, hash: &TxHash) -> Result<Option<TxDetail>, WalletError>;

    /// Fetch up to `mix` decoy outputs per requested denomination.
    fn get_global_utxos(
        &self,
        token: &str,
        amounts: &[u64],
        mix: u32,
    ) -> Result<Vec<AmountDecoys>, WalletError>;

    /// Page through transactions touching `req.addr`.
    fn get_privacy_txs_by_addr(&self, req: &TxListRequest) -> Result<Vec<TxSummary>, WalletError>;

    /// Bulk lookup of transaction details.
    fn get_transactions_by_hash(&self, hashes: &[TxHash]) -> Result<Vec<TxDetail>, WalletError>;

    /// Current chain tip.
    fn last_header(&self) -> Result<ChainHeader, WalletError>;
}
