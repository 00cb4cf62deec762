//! Test doubles: a deterministic crypto oracle, an in-memory chain and
//! store/wallet fixtures.
//!
//! The mock oracle works in the additive group of integers mod 2^64 with
//! a fixed odd generator, embedded in the low eight bytes of each
//! 32-byte value. Multiplication commutes, so the one-time-address
//! derive/recover round trip and the key-image determinism the engine
//! relies on hold exactly as they would on a curve.

use lmdb::Transaction;
use rand::{rngs::StdRng, SeedableRng};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

use crate::{
    chain::{
        AmountDecoys, BlockDetail, ChainClient, ChainHeader, TxDetail, TxListRequest, TxSummary,
    },
    crypto::RingCrypto,
    error::WalletError,
    keys::{PrivacyKeys, PublicKeyPair},
    signer::TxSigner,
    store::{OwnedUtxo, WalletStore},
    types::{KeyImage, PrivateKey, PublicKey, RingSignatureItem, Tx, TxHash, UtxoBasic},
    wallet::{Wallet, WalletConfig},
};

const GEN: u64 = 0x9E37_79B9_7F4A_7C15;

fn scalar(bytes: &[u8; 32]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

fn embed(value: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&value.to_le_bytes());
    bytes
}

fn h64(domain: &[u8], parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

fn ring_digest(msg_hash: &[u8], ring: &[PublicKey], key_image: &KeyImage) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"mock-ring-sig");
    hasher.update(msg_hash);
    for member in ring {
        hasher.update(member.as_bytes());
    }
    hasher.update(key_image.as_bytes());
    hasher.finalize().to_vec()
}

/// Deterministic stand-in for the chain's curve primitives.
pub struct MockOracle;

impl RingCrypto for MockOracle {
    fn generate_key_pair(&self, rng: &mut dyn CryptoRngCore) -> (PrivateKey, PublicKey) {
        let private = rng.next_u64();
        (
            PrivateKey::from(embed(private)),
            PublicKey::from(embed(private.wrapping_mul(GEN))),
        )
    }

    fn derive_privacy_keys(&self, seed: &[u8; 32]) -> PrivacyKeys {
        let view_priv = h64(b"mock-view", &[seed]);
        let spend_priv = h64(b"mock-spend", &[seed]);
        PrivacyKeys {
            view_priv: PrivateKey::from(embed(view_priv)),
            view_pub: PublicKey::from(embed(view_priv.wrapping_mul(GEN))),
            spend_priv: PrivateKey::from(embed(spend_priv)),
            spend_pub: PublicKey::from(embed(spend_priv.wrapping_mul(GEN))),
        }
    }

    fn public_key(&self, private: &PrivateKey) -> PublicKey {
        PublicKey::from(embed(scalar(private.as_bytes()).wrapping_mul(GEN)))
    }

    fn one_time_address(
        &self,
        recv_view_pub: &PublicKey,
        recv_spend_pub: &PublicKey,
        eph_priv: &PrivateKey,
        index: u64,
    ) -> Result<PublicKey, WalletError> {
        let shared = scalar(eph_priv.as_bytes()).wrapping_mul(scalar(recv_view_pub.as_bytes()));
        let hs = h64(b"mock-hs", &[&shared.to_le_bytes(), &index.to_le_bytes()]);
        let point = hs
            .wrapping_mul(GEN)
            .wrapping_add(scalar(recv_spend_pub.as_bytes()));
        Ok(PublicKey::from(embed(point)))
    }

    fn recover_one_time_key(
        &self,
        r_tx_pub: &PublicKey,
        view_priv: &PrivateKey,
        spend_priv: &PrivateKey,
        index: u64,
    ) -> Result<PrivateKey, WalletError> {
        let shared = scalar(view_priv.as_bytes()).wrapping_mul(scalar(r_tx_pub.as_bytes()));
        let hs = h64(b"mock-hs", &[&shared.to_le_bytes(), &index.to_le_bytes()]);
        Ok(PrivateKey::from(embed(
            hs.wrapping_add(scalar(spend_priv.as_bytes())),
        )))
    }

    fn key_image(
        &self,
        one_time_priv: &PrivateKey,
        one_time_pub: &PublicKey,
    ) -> Result<KeyImage, WalletError> {
        let hp = h64(b"mock-hp", &[one_time_pub.as_bytes()]);
        Ok(KeyImage::from(embed(
            scalar(one_time_priv.as_bytes()).wrapping_mul(hp),
        )))
    }

    fn ring_sign(
        &self,
        msg_hash: &[u8; 32],
        ring: &[PublicKey],
        real_priv: &PrivateKey,
        real_index: usize,
        key_image: &KeyImage,
        _rng: &mut dyn CryptoRngCore,
    ) -> Result<RingSignatureItem, WalletError> {
        let real_pub = self.public_key(real_priv);
        if ring.get(real_index) != Some(&real_pub) {
            return Err(WalletError::Crypto(
                "real key is not at the claimed ring position".to_string(),
            ));
        }
        Ok(RingSignatureItem {
            signature: ring_digest(msg_hash, ring, key_image),
        })
    }
}

/// Check a mock ring signature against a ring in a given order.
pub fn mock_ring_verify(
    item: &RingSignatureItem,
    msg_hash: &[u8],
    ring: &[PublicKey],
    key_image: &KeyImage,
) -> bool {
    item.signature == ring_digest(msg_hash, ring, key_image)
}

/// Conventional signer double for public senders.
pub struct MockSigner;

impl TxSigner for MockSigner {
    fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"mock-plain-sig");
        hasher.update(msg);
        hasher.finalize().to_vec()
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        b"mock-signer-pub".to_vec()
    }
}

#[derive(Default)]
struct MockChainState {
    header: Option<ChainHeader>,
    submitted: Vec<Tx>,
    decoys: HashMap<u64, Vec<UtxoBasic>>,
    known_txs: HashMap<TxHash, TxDetail>,
    history: Vec<TxSummary>,
    reject_submit: Option<String>,
}

/// In-memory chain double. Clones share state, so a test can keep a
/// handle while the wallet owns another.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<MockChainState>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self {
            state: Arc::new(Mutex::new(MockChainState::default())),
        };
        chain.set_header(ChainHeader {
            height: 100,
            block_time: 1_000_000,
        });
        chain
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockChainState> {
        self.state.lock().unwrap()
    }

    pub fn set_header(&self, header: ChainHeader) {
        self.state().header = Some(header);
    }

    pub fn set_decoys(&self, amount: u64, decoys: Vec<UtxoBasic>) {
        self.state().decoys.insert(amount, decoys);
    }

    /// Make a transaction visible to `query_tx` / `get_transactions_by_hash`.
    pub fn add_known_tx(&self, detail: TxDetail) {
        let hash = detail.tx.hash().unwrap();
        self.state().known_txs.insert(hash, detail);
    }

    pub fn forget_tx(&self, hash: &TxHash) {
        self.state().known_txs.remove(hash);
    }

    pub fn set_history(&self, history: Vec<TxSummary>) {
        self.state().history = history;
    }

    pub fn set_reject_submit(&self, reason: Option<&str>) {
        self.state().reject_submit = reason.map(str::to_string);
    }

    pub fn take_submitted(&self) -> Vec<Tx> {
        std::mem::take(&mut self.state().submitted)
    }

    pub fn last_submitted(&self) -> Option<Tx> {
        self.state().submitted.last().cloned()
    }
}

impl ChainClient for MockChain {
    fn send_tx(&self, tx: &Tx) -> Result<TxHash, WalletError> {
        let mut state = self.state();
        if let Some(reason) = &state.reject_submit {
            return Err(WalletError::SubmitFailed(reason.clone()));
        }
        state.submitted.push(tx.clone());
        tx.hash()
    }

    fn query_tx(&self, hash: &TxHash) -> Result<Option<TxDetail>, WalletError> {
        Ok(self.state().known_txs.get(hash).cloned())
    }

    fn get_global_utxos(
        &self,
        _token: &str,
        amounts: &[u64],
        mix: u32,
    ) -> Result<Vec<AmountDecoys>, WalletError> {
        let state = self.state();
        Ok(amounts
            .iter()
            .map(|&amount| {
                let mut utxos = state.decoys.get(&amount).cloned().unwrap_or_default();
                utxos.truncate(mix as usize);
                AmountDecoys { amount, utxos }
            })
            .collect())
    }

    fn get_privacy_txs_by_addr(&self, req: &TxListRequest) -> Result<Vec<TxSummary>, WalletError> {
        let state = self.state();
        let start = if req.height < 0 {
            0
        } else {
            match state
                .history
                .iter()
                .position(|s| s.height == req.height && s.index == req.index)
            {
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            }
        };
        Ok(state
            .history
            .iter()
            .skip(start)
            .take(req.count.max(0) as usize)
            .cloned()
            .collect())
    }

    fn get_transactions_by_hash(&self, hashes: &[TxHash]) -> Result<Vec<TxDetail>, WalletError> {
        let state = self.state();
        Ok(hashes
            .iter()
            .filter_map(|hash| state.known_txs.get(hash).cloned())
            .collect())
    }

    fn last_header(&self) -> Result<ChainHeader, WalletError> {
        self.state()
            .header
            .ok_or_else(|| WalletError::ChainQuery("no header".to_string()))
    }
}

/// Privacy keys plus public pair derived from a one-byte seed.
pub fn mock_pair_with_keys(oracle: &MockOracle, seed_byte: u8) -> (PrivacyKeys, PublicKeyPair) {
    let keys = oracle.derive_privacy_keys(&[seed_byte; 32]);
    let pair = keys.public_pair();
    (keys, pair)
}

fn owner_seed(owner: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"mock-owner-seed");
    hasher.update(owner.as_bytes());
    hasher.finalize().into()
}

/// A store pre-populated with one output per entry of `amounts`, all
/// owned by `owner` at `height`, with one-time keys that genuinely
/// recover under the returned key pair.
pub fn seeded_wallet_store(
    oracle: &MockOracle,
    owner: &str,
    amounts: &[u64],
    height: i64,
) -> (TempDir, WalletStore, PrivacyKeys) {
    let dir = TempDir::new().unwrap();
    let store = WalletStore::open(dir.path()).unwrap();
    let keys = oracle.derive_privacy_keys(&owner_seed(owner));

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut txn = store.rw_txn().unwrap();
    for (n, &amount) in amounts.iter().enumerate() {
        let (eph_priv, eph_pub) = oracle.generate_key_pair(&mut rng);
        let one_time = oracle
            .one_time_address(&keys.view_pub, &keys.spend_pub, &eph_priv, 0)
            .unwrap();
        let mut hash = [0u8; 32];
        hash[0] = 0xAA;
        hash[1] = n as u8;
        let record = OwnedUtxo {
            tx_hash: TxHash::from(hash),
            out_index: 0,
            token: "VEIL".to_string(),
            owner: owner.to_string(),
            amount,
            r_tx_pub: eph_pub,
            one_time_pub_key: one_time,
            height,
            tx_index: 0,
        };
        assert!(store.set_utxo(&mut txn, &record).unwrap());
    }
    txn.commit().unwrap();
    (dir, store, keys)
}

/// A wallet over a fresh store, the mock oracle and a shared-handle mock
/// chain.
pub fn new_test_wallet(password: &str) -> (TempDir, Wallet, MockChain) {
    let dir = TempDir::new().unwrap();
    let store = WalletStore::open(dir.path()).unwrap();
    let chain = MockChain::new();
    let wallet = Wallet::new(
        store,
        Box::new(chain.clone()),
        Box::new(MockOracle),
        StdRng::seed_from_u64(42),
        password,
        WalletConfig::default(),
    );
    (dir, wallet, chain)
}

/// Wrap transactions into a block, numbering them in order.
pub fn make_block(header: ChainHeader, txs: Vec<(Tx, bool)>) -> BlockDetail {
    let txs = txs
        .into_iter()
        .enumerate()
        .map(|(index, (tx, exec_ok))| TxDetail {
            tx,
            height: header.height,
            index: index as u32,
            exec_ok,
        })
        .collect();
    BlockDetail { header, txs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_time_roundtrip_holds() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(1);
        let keys = oracle.derive_privacy_keys(&[5u8; 32]);
        let (eph_priv, eph_pub) = oracle.generate_key_pair(&mut rng);

        for index in 0..4u64 {
            let one_time = oracle
                .one_time_address(&keys.view_pub, &keys.spend_pub, &eph_priv, index)
                .unwrap();
            let recovered = oracle
                .recover_one_time_key(&eph_pub, &keys.view_priv, &keys.spend_priv, index)
                .unwrap();
            assert_eq!(oracle.public_key(&recovered), one_time);
        }
    }

    #[test]
    fn wrong_view_key_does_not_recover() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(2);
        let keys = oracle.derive_privacy_keys(&[5u8; 32]);
        let other = oracle.derive_privacy_keys(&[6u8; 32]);
        let (eph_priv, eph_pub) = oracle.generate_key_pair(&mut rng);

        let one_time = oracle
            .one_time_address(&keys.view_pub, &keys.spend_pub, &eph_priv, 0)
            .unwrap();
        let recovered = oracle
            .recover_one_time_key(&eph_pub, &other.view_priv, &other.spend_priv, 0)
            .unwrap();
        assert_ne!(oracle.public_key(&recovered), one_time);
    }

    #[test]
    fn key_image_is_deterministic_and_key_specific() {
        let oracle = MockOracle;
        let a = PrivateKey::from(embed(11));
        let b = PrivateKey::from(embed(12));
        let pub_a = oracle.public_key(&a);
        let pub_b = oracle.public_key(&b);
        assert_eq!(
            oracle.key_image(&a, &pub_a).unwrap(),
            oracle.key_image(&a, &pub_a).unwrap()
        );
        assert_ne!(
            oracle.key_image(&a, &pub_a).unwrap(),
            oracle.key_image(&b, &pub_b).unwrap()
        );
    }

    #[test]
    fn ring_sign_rejects_wrong_position() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(3);
        let (real_priv, real_pub) = oracle.generate_key_pair(&mut rng);
        let (_, decoy_pub) = oracle.generate_key_pair(&mut rng);
        let key_image = oracle.key_image(&real_priv, &real_pub).unwrap();
        let ring = vec![decoy_pub, real_pub];

        assert!(oracle
            .ring_sign(&[1u8; 32], &ring, &real_priv, 1, &key_image, &mut rng)
            .is_ok());
        assert!(oracle
            .ring_sign(&[1u8; 32], &ring, &real_priv, 0, &key_image, &mut rng)
            .is_err());
    }
}
