//! Veil privacy wallet engine.
//!
//! Builds the three flavors of privacy transactions over an
//! account-and-UTXO chain — public→private, private→private,
//! private→public — and tracks the per-account UTXO state machine
//! (available → frozen → spent, with reorg and expiry reversals) as
//! confirmed blocks arrive.
//!
//! ## Security model
//!
//! - One-time addresses hide recipients; ring signatures hide which
//!   input really spends. Anonymity is bounded by the configured mix
//!   count.
//! - Curve arithmetic lives behind the [`crypto::RingCrypto`] oracle;
//!   this crate never touches raw point math.
//! - Private key halves rest encrypted under the wallet password and
//!   are decrypted on demand.
//! - Chain access is blocking and minimal; the node is untrusted beyond
//!   what the view-key scan verifies.

pub mod amount;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod inputs;
pub mod keys;
mod observer;
pub mod outputs;
pub mod selection;
pub mod signer;
pub mod store;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amount::decompose_amount;
pub use chain::{AmountDecoys, BlockDetail, ChainClient, ChainHeader, TxDetail};
pub use crypto::RingCrypto;
pub use error::{StoreError, WalletError};
pub use inputs::{build_input, InputBundle};
pub use keys::{EncryptedPrivacyKeys, PrivacyKeys, PublicKeyPair};
pub use outputs::{generate_custom_outputs, generate_outputs};
pub use selection::select_utxos;
pub use signer::{sign_tx_plain, sign_tx_ring, TxSigner};
pub use store::{FrozenTx, OwnedUtxo, RescanFlag, SpentTx, WalletStore};
pub use types::{
    ActionKind, KeyImage, KeyInput, KeyOutput, PrivacyAction, PrivacyInput, PrivacyOutput,
    PrivateKey, PublicKey, RealKeyInput, SigningContext, Tx, TxHash, Utxo, UtxoBasic,
    UtxoGlobalIndex, COIN, DUST_THRESHOLD, FEE_PER_KB, MATURITY_DEPTH, MAX_MIX_COUNT, PRIVACY_FEE,
};
pub use wallet::{
    CreateTxRequest, CreateUtxosRequest, PrivacyAccountInfo, PrivacyToPrivacyRequest,
    PrivacyToPublicRequest, PublicToPrivacyRequest, Wallet, WalletConfig,
};
