//! Core data model: system constants, fixed-size key newtypes, the privacy
//! wire schema and the outer transaction envelope.
//!
//! All 32-byte values are typed wrappers over `[u8; 32]` with checked
//! `from_bytes` conversions; raw slices only appear at the serialization
//! boundary.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use crate::error::WalletError;

/// Base unit granularity: a privacy amount must be a positive multiple of
/// this.
pub const COIN: u64 = 100_000_000;

/// Residual amounts below this are emitted as a single dust chunk by the
/// decomposer.
pub const DUST_THRESHOLD: u64 = 1_000_000;

/// Fee charged per started kilobyte of a public-sender transaction.
pub const FEE_PER_KB: u64 = 100_000;

/// Flat fee for ring-signed (private-sender) transactions. The fee is
/// burned; no fee output is ever emitted.
pub const PRIVACY_FEE: u64 = 1_000_000;

/// Confirmation depth after which a UTXO is preferred by the selector.
pub const MATURITY_DEPTH: i64 = 12;

/// Upper bound on the per-input decoy count.
pub const MAX_MIX_COUNT: u32 = 16;

/// Reserved size for the yet-absent signature when estimating a public
/// transaction's fee from its serialized length.
pub const SIGNATURE_RESERVE_BYTES: usize = 300;

/// Executor tag of the privacy contract.
pub const PRIVACY_CONTRACT: &str = "privacy";

/// Deterministic on-chain address of a contract executor.
pub fn exec_address(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"veil-exec-address:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..20])
}

/// Conventional public key attributed to a contract executor. Ring-signed
/// transactions carry this in the signature's `pub_key` field so the
/// envelope stays uniform; verifiers rely on the ring items, not on it.
pub fn contract_pub_key(name: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"veil-exec-pubkey:");
    hasher.update(name.as_bytes());
    hasher.finalize().to_vec()
}

fn expect_32(bytes: &[u8]) -> Result<[u8; 32], WalletError> {
    if bytes.len() != 32 {
        return Err(WalletError::InvalidParams("expected a 32-byte value"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// A compressed public curve point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        Ok(Self(expect_32(bytes)?))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// A private curve scalar. Zeroized on request; never printed.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize, Zeroize)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        Ok(Self(expect_32(bytes)?))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PrivateKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

/// The image of a one-time private key; equal images expose double-spends.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyImage([u8; 32]);

impl KeyImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        Ok(Self(expect_32(bytes)?))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for KeyImage {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", hex::encode(self.0))
    }
}

/// Canonical transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        Ok(Self(expect_32(bytes)?))
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(s)
            .map_err(|_| WalletError::InvalidParams("transaction hash is not valid hex"))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TxHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(self.0))
    }
}

/// Chain-wide identifier of a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoGlobalIndex {
    pub tx_hash: TxHash,
    pub out_index: u32,
}

/// A global index together with its one-time public key; the shape ring
/// members are exchanged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoBasic {
    pub global_index: UtxoGlobalIndex,
    pub one_time_pub_key: PublicKey,
}

/// A fully described unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub amount: u64,
    pub basic: UtxoBasic,
}

/// One denomination entry in a transaction's output vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutput {
    pub amount: u64,
    pub one_time_pub_key: PublicKey,
}

/// The privacy output side: the ephemeral transaction public key `R` plus
/// one one-time address per denomination. The output's position in the
/// vector is the index bound into its one-time address; reordering breaks
/// recoverability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyOutput {
    pub r_tx_pub: PublicKey,
    pub key_outputs: Vec<KeyOutput>,
}

/// One ring-signed input. `ring` holds real and decoy outputs in the
/// permuted order the signature is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    pub amount: u64,
    pub key_image: KeyImage,
    pub ring: Vec<UtxoGlobalIndex>,
}

/// The privacy input side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrivacyInput {
    pub key_inputs: Vec<KeyInput>,
}

/// Signing material for one input: where the real member sits in the
/// permuted ring and the recovered one-time spend key. Never serialized
/// onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealKeyInput {
    pub real_position: u32,
    pub one_time_priv_key: PrivateKey,
}

/// Side-channel returned by the deferred-build entry points; a later
/// signing call consumes it. The wire format only ever carries the
/// finished ring signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningContext {
    pub kind: ActionKind,
    pub rings: Vec<Vec<UtxoBasic>>,
    pub real_keys: Vec<RealKeyInput>,
}

/// Discriminant of the three privacy action flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Public2Privacy,
    Privacy2Privacy,
    Privacy2Public,
}

/// Payload of a privacy transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyAction {
    /// Public sender funds one-time outputs; no ring inputs, no change.
    Public2Privacy {
        token: String,
        amount: u64,
        note: String,
        output: PrivacyOutput,
    },
    /// Ring-signed spend into fresh one-time outputs (transfer + change).
    Privacy2Privacy {
        token: String,
        amount: u64,
        note: String,
        input: PrivacyInput,
        output: PrivacyOutput,
    },
    /// Ring-signed spend paying a public address in clear; outputs are
    /// change only.
    Privacy2Public {
        token: String,
        amount: u64,
        note: String,
        input: PrivacyInput,
        output: PrivacyOutput,
    },
}

impl PrivacyAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            PrivacyAction::Public2Privacy { .. } => ActionKind::Public2Privacy,
            PrivacyAction::Privacy2Privacy { .. } => ActionKind::Privacy2Privacy,
            PrivacyAction::Privacy2Public { .. } => ActionKind::Privacy2Public,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            PrivacyAction::Public2Privacy { token, .. }
            | PrivacyAction::Privacy2Privacy { token, .. }
            | PrivacyAction::Privacy2Public { token, .. } => token,
        }
    }

    pub fn output(&self) -> &PrivacyOutput {
        match self {
            PrivacyAction::Public2Privacy { output, .. }
            | PrivacyAction::Privacy2Privacy { output, .. }
            | PrivacyAction::Privacy2Public { output, .. } => output,
        }
    }

    pub fn input(&self) -> Option<&PrivacyInput> {
        match self {
            PrivacyAction::Public2Privacy { .. } => None,
            PrivacyAction::Privacy2Privacy { input, .. }
            | PrivacyAction::Privacy2Public { input, .. } => Some(input),
        }
    }
}

/// Signature scheme tags understood by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigType {
    /// Conventional single-key signature of a public sender.
    Ed25519,
    /// Vector of per-input ring signature items.
    RingBaseEd25519,
}

/// Signature envelope of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub sig_type: SigType,
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
}

/// One ring signature, produced by the crypto oracle. Opaque to the
/// wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSignatureItem {
    pub signature: Vec<u8>,
}

/// The serialized signature body of a ring-signed transaction: one item
/// per input, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSignature {
    pub items: Vec<RingSignatureItem>,
}

/// Outer transaction envelope submitted to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Executor tag routing the payload.
    pub execer: String,
    /// Encoded `PrivacyAction`.
    pub payload: Vec<u8>,
    pub fee: u64,
    pub nonce: u64,
    /// Receiving address: the privacy contract, or the public receiver of
    /// a privacy-to-public transfer.
    pub to: String,
    /// Absolute expiry, seconds since the epoch. Zero means no expiry.
    pub expire: i64,
    pub signature: Option<Signature>,
}

impl Tx {
    pub fn new_privacy(
        action: &PrivacyAction,
        to: String,
        nonce: u64,
        expire: i64,
    ) -> Result<Self, WalletError> {
        Ok(Self {
            execer: PRIVACY_CONTRACT.to_string(),
            payload: bincode::serialize(action)?,
            fee: 0,
            nonce,
            to,
            expire,
            signature: None,
        })
    }

    /// Decode the payload back into its action.
    pub fn action(&self) -> Result<PrivacyAction, WalletError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Serialized form with the signature cleared; what gets hashed and
    /// what signatures bind.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, WalletError> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        Ok(bincode::serialize(&unsigned)?)
    }

    /// Canonical transaction hash: signature-independent.
    pub fn hash(&self) -> Result<TxHash, WalletError> {
        let mut hasher = Sha256::new();
        hasher.update(b"veil-tx-v1");
        hasher.update(self.canonical_bytes()?);
        let digest: [u8; 32] = hasher.finalize().into();
        Ok(TxHash::from(digest))
    }

    /// Current serialized size in bytes.
    pub fn size(&self) -> Result<usize, WalletError> {
        Ok(bincode::serialize(self)?.len())
    }

    pub fn to_hex(&self) -> Result<String, WalletError> {
        Ok(hex::encode(bincode::serialize(self)?))
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes =
            hex::decode(s).map_err(|_| WalletError::InvalidParams("transaction hex is invalid"))?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action() -> PrivacyAction {
        PrivacyAction::Public2Privacy {
            token: "VEIL".to_string(),
            amount: COIN,
            note: String::new(),
            output: PrivacyOutput {
                r_tx_pub: PublicKey::from([7u8; 32]),
                key_outputs: vec![KeyOutput {
                    amount: COIN,
                    one_time_pub_key: PublicKey::from([9u8; 32]),
                }],
            },
        }
    }

    #[test]
    fn key_newtypes_check_length() {
        assert!(PublicKey::from_bytes(&[0u8; 32]).is_ok());
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_err());
        assert!(PrivateKey::from_bytes(&[0u8; 33]).is_err());
        assert!(TxHash::from_bytes(&[]).is_err());
        assert!(KeyImage::from_bytes(&[1u8; 32]).is_ok());
    }

    #[test]
    fn tx_hash_ignores_signature() {
        let action = sample_action();
        let mut tx = Tx::new_privacy(&action, exec_address(PRIVACY_CONTRACT), 42, 0).unwrap();
        let unsigned_hash = tx.hash().unwrap();

        tx.signature = Some(Signature {
            sig_type: SigType::Ed25519,
            signature: vec![0xff; 64],
            pub_key: vec![1, 2, 3],
        });
        assert_eq!(tx.hash().unwrap(), unsigned_hash);
    }

    #[test]
    fn tx_hex_roundtrip() {
        let action = sample_action();
        let tx = Tx::new_privacy(&action, exec_address(PRIVACY_CONTRACT), 1, 99).unwrap();
        let parsed = Tx::from_hex(&tx.to_hex().unwrap()).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.action().unwrap(), action);
    }

    #[test]
    fn action_accessors() {
        let action = sample_action();
        assert_eq!(action.kind(), ActionKind::Public2Privacy);
        assert_eq!(action.token(), "VEIL");
        assert!(action.input().is_none());
        assert_eq!(action.output().key_outputs.len(), 1);
    }

    #[test]
    fn exec_address_is_stable() {
        assert_eq!(exec_address("privacy"), exec_address("privacy"));
        assert_ne!(exec_address("privacy"), exec_address("coins"));
        assert_eq!(exec_address("privacy").len(), 40);
    }
}
