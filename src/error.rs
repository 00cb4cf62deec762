//! Error types surfaced by the wallet.
//!
//! Every failure a caller can observe maps to one of the variants below;
//! nothing is retried inside the library. The chain observer is the one
//! exception to "errors propagate": it logs and keeps going, because a bad
//! transaction in a block must never stall block processing.

use displaydoc::Display;

/// Errors returned by wallet entry points.
#[derive(Debug, Display)]
pub enum WalletError {
    /// wallet is locked
    WalletLocked,

    /// wallet is not ready
    WalletNotReady,

    /// a utxo rescan is in progress
    RescanInProgress,

    /// invalid request parameters: {0}
    InvalidParams(&'static str),

    /// invalid privacy amount: {0}
    InvalidAmount(u64),

    /// recipient public key pair must be 64 bytes, got {0}
    InvalidPubKeyLen(usize),

    /// insufficient balance: have {available}, need {required}
    InsufficientBalance {
        /// Spendable sum over the eligible pool
        available: u64,
        /// Target amount including fee
        required: u64,
    },

    /// crypto oracle failure: {0}
    Crypto(String),

    /// chain query failed: {0}
    ChainQuery(String),

    /// transaction submit rejected: {0}
    SubmitFailed(String),

    /// store: {0}
    Store(StoreError),

    /// serialization: {0}
    Serialization(String),
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        WalletError::Store(e)
    }
}

impl From<bincode::Error> for WalletError {
    fn from(e: bincode::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

/// Errors from the LMDB-backed wallet store.
#[derive(Debug, Display)]
pub enum StoreError {
    /// lmdb: {0}
    Lmdb(lmdb::Error),

    /// record serialization: {0}
    Serialization(String),
}

impl std::error::Error for StoreError {}

impl From<lmdb::Error> for StoreError {
    fn from(e: lmdb::Error) -> Self {
        StoreError::Lmdb(e)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
