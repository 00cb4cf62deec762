//! The crypto oracle consumed by the wallet.
//!
//! The wallet never performs curve arithmetic itself; everything the
//! one-time-address and ring-signature algebra requires sits behind this
//! trait so the engine can be exercised against a deterministic
//! implementation. A production build plugs in the chain's native
//! primitives.

use rand_core::CryptoRngCore;

use crate::{
    error::WalletError,
    keys::PrivacyKeys,
    types::{KeyImage, PrivateKey, PublicKey, RingSignatureItem},
};

/// One-time-address and ring-signature primitives.
///
/// Contract highlights the wallet relies on:
/// - `recover_one_time_key` inverts `one_time_address` for matching key
///   material and index, and `public_key` of the recovered scalar equals
///   the output's one-time public key.
/// - `key_image` is deterministic in `(one_time_priv, one_time_pub)`.
/// - `ring_sign` binds the message to the ring in the exact order given;
///   permuting the ring invalidates the signature.
pub trait RingCrypto: Send {
    /// Fresh ephemeral key pair.
    fn generate_key_pair(&self, rng: &mut dyn CryptoRngCore) -> (PrivateKey, PublicKey);

    /// Deterministic view/spend pairs from a 32-byte seed, used when an
    /// address enables privacy for the first time.
    fn derive_privacy_keys(&self, seed: &[u8; 32]) -> PrivacyKeys;

    /// Public half of a private scalar.
    fn public_key(&self, private: &PrivateKey) -> PublicKey;

    /// `P_i = H_s(eph_priv * recv_view_pub, index) * G + recv_spend_pub`.
    fn one_time_address(
        &self,
        recv_view_pub: &PublicKey,
        recv_spend_pub: &PublicKey,
        eph_priv: &PrivateKey,
        index: u64,
    ) -> Result<PublicKey, WalletError>;

    /// `x = H_s(view_priv * r_tx_pub, index) + spend_priv`.
    fn recover_one_time_key(
        &self,
        r_tx_pub: &PublicKey,
        view_priv: &PrivateKey,
        spend_priv: &PrivateKey,
        index: u64,
    ) -> Result<PrivateKey, WalletError>;

    /// `I = x * H_p(P)`.
    fn key_image(
        &self,
        one_time_priv: &PrivateKey,
        one_time_pub: &PublicKey,
    ) -> Result<KeyImage, WalletError>;

    /// Ring signature over `msg_hash` with the real key at `real_index`
    /// of `ring`.
    fn ring_sign(
        &self,
        msg_hash: &[u8; 32],
        ring: &[PublicKey],
        real_priv: &PrivateKey,
        real_index: usize,
        key_image: &KeyImage,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<RingSignatureItem, WalletError>;
}
