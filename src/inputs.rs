//! Ring input construction.
//!
//! Selects spendable outputs, fetches same-denomination decoys from the
//! chain in one query, assembles each ring in a fresh random permutation,
//! recovers the one-time spend keys and computes key images.
//!
//! The order of global indexes inside each [`KeyInput`] is exactly the
//! order of the ring the signer is handed; any divergence produces
//! signatures verifiers reject.

use rand::{seq::SliceRandom, Rng};
use rand_core::CryptoRng;
use tracing::{debug, warn};

use crate::{
    chain::ChainClient,
    crypto::RingCrypto,
    error::WalletError,
    keys::PrivacyKeys,
    selection::select_utxos,
    store::{OwnedUtxo, WalletStore},
    types::{KeyInput, PrivacyInput, RealKeyInput, UtxoBasic, MAX_MIX_COUNT},
};

/// Everything a build produces for the input side: the wire input, the
/// per-input rings in signature order, the recovered signing keys and the
/// selected outputs to freeze.
pub struct InputBundle {
    pub input: PrivacyInput,
    pub rings: Vec<Vec<UtxoBasic>>,
    pub real_keys: Vec<RealKeyInput>,
    pub selected: Vec<OwnedUtxo>,
}

/// Build ring inputs covering `target_amount` for `(token, sender)`.
#[allow(clippy::too_many_arguments)]
pub fn build_input<R: Rng + CryptoRng + ?Sized>(
    store: &WalletStore,
    chain: &dyn ChainClient,
    crypto: &dyn RingCrypto,
    keys: &PrivacyKeys,
    token: &str,
    sender: &str,
    target_amount: u64,
    mix: u32,
    current_height: i64,
    rng: &mut R,
) -> Result<InputBundle, WalletError> {
    let candidates = store.list_available(token, sender)?;
    let selected = select_utxos(&candidates, current_height, target_amount, rng)?;
    debug!(count = selected.len(), target_amount, "selected inputs");

    let mix = mix.min(MAX_MIX_COUNT);
    let mut decoys_by_amount = if mix > 0 {
        let amounts: Vec<u64> = selected.iter().map(|u| u.amount).collect();
        let mut response = chain.get_global_utxos(token, &amounts, mix)?;
        response.sort_by_key(|d| d.amount);
        if response.len() != selected.len() {
            warn!(
                selected = selected.len(),
                returned = response.len(),
                "decoy response does not cover every selected amount"
            );
        }
        response
    } else {
        Vec::new()
    };

    let mut key_inputs = Vec::with_capacity(selected.len());
    let mut rings = Vec::with_capacity(selected.len());
    let mut real_keys = Vec::with_capacity(selected.len());

    for (i, real) in selected.iter().enumerate() {
        let mut ring: Vec<UtxoBasic> = match decoys_by_amount.get_mut(i) {
            Some(entry) if entry.amount == real.amount => std::mem::take(&mut entry.utxos),
            _ => Vec::new(),
        };

        // Never ring with ourselves.
        ring.retain(|decoy| decoy.one_time_pub_key != real.one_time_pub_key);
        ring.truncate(mix as usize);
        if mix > 0 && ring.len() < mix as usize {
            warn!(
                amount = real.amount,
                decoys = ring.len(),
                requested = mix,
                "ring smaller than requested mix"
            );
        }

        ring.push(real.to_basic());
        ring.shuffle(rng);
        let real_position = ring
            .iter()
            .position(|member| member.one_time_pub_key == real.one_time_pub_key)
            .ok_or_else(|| WalletError::Crypto("real member missing from ring".to_string()))?;

        // x = H_s(a * R, out_index) + b; the oracle's public half must
        // land back on the output's one-time key.
        let one_time_priv = crypto.recover_one_time_key(
            &real.r_tx_pub,
            &keys.view_priv,
            &keys.spend_priv,
            u64::from(real.out_index),
        )?;
        if crypto.public_key(&one_time_priv) != real.one_time_pub_key {
            return Err(WalletError::Crypto(
                "recovered one-time key does not match the output".to_string(),
            ));
        }
        let key_image = crypto.key_image(&one_time_priv, &real.one_time_pub_key)?;

        key_inputs.push(KeyInput {
            amount: real.amount,
            key_image,
            ring: ring.iter().map(|member| member.global_index).collect(),
        });
        real_keys.push(RealKeyInput {
            real_position: real_position as u32,
            one_time_priv_key: one_time_priv,
        });
        rings.push(ring);
    }

    Ok(InputBundle {
        input: PrivacyInput { key_inputs },
        rings,
        real_keys,
        selected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{seeded_wallet_store, MockChain, MockOracle};
    use crate::types::{PublicKey, TxHash, UtxoGlobalIndex};
    use rand::{rngs::StdRng, SeedableRng};

    fn decoy(n: u8) -> UtxoBasic {
        UtxoBasic {
            global_index: UtxoGlobalIndex {
                tx_hash: TxHash::from([n; 32]),
                out_index: 0,
            },
            one_time_pub_key: PublicKey::from([n; 32]),
        }
    }

    #[test]
    fn mix_zero_builds_singleton_rings() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(21);
        let (_dir, store, keys) =
            seeded_wallet_store(&oracle, "alice", &[300_000_000, 200_000_000], 10);
        let chain = MockChain::new();

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 400_000_000, 0, 100, &mut rng,
        )
        .unwrap();

        assert_eq!(bundle.input.key_inputs.len(), 2);
        for (key_input, real) in bundle.input.key_inputs.iter().zip(&bundle.real_keys) {
            assert_eq!(key_input.ring.len(), 1);
            assert_eq!(real.real_position, 0);
        }
        // Ascending amount order feeds the signer.
        assert_eq!(bundle.input.key_inputs[0].amount, 200_000_000);
        assert_eq!(bundle.input.key_inputs[1].amount, 300_000_000);
    }

    #[test]
    fn self_decoy_is_removed_and_ring_shrinks() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(22);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let own = store.list_available("VEIL", "alice").unwrap().remove(0);
        let chain = MockChain::new();
        // Four decoys, one of them our own output.
        chain.set_decoys(
            300_000_000,
            vec![decoy(101), decoy(102), own.to_basic(), decoy(103)],
        );

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 5, 100, &mut rng,
        )
        .unwrap();

        // Duplicate removed: 3 decoys + self, not 6 members.
        assert_eq!(bundle.input.key_inputs[0].ring.len(), 4);
        assert_eq!(bundle.rings[0].len(), 4);
    }

    #[test]
    fn real_position_points_at_the_real_member() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(23);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let own = store.list_available("VEIL", "alice").unwrap().remove(0);
        let chain = MockChain::new();
        chain.set_decoys(300_000_000, (0..5).map(|n| decoy(100 + n)).collect());

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 5, 100, &mut rng,
        )
        .unwrap();

        let position = bundle.real_keys[0].real_position as usize;
        assert_eq!(
            bundle.rings[0][position].one_time_pub_key,
            own.one_time_pub_key
        );
        // The wire ring mirrors the signing ring order member by member.
        let wire: Vec<_> = bundle.input.key_inputs[0].ring.clone();
        let signing: Vec<_> = bundle.rings[0]
            .iter()
            .map(|member| member.global_index)
            .collect();
        assert_eq!(wire, signing);
    }

    #[test]
    fn mix_is_clamped_to_the_maximum() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(24);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();
        chain.set_decoys(300_000_000, (0..40).map(|n| decoy(100 + n)).collect());

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 99, 100, &mut rng,
        )
        .unwrap();
        assert_eq!(
            bundle.input.key_inputs[0].ring.len(),
            MAX_MIX_COUNT as usize + 1
        );
    }

    #[test]
    fn decoy_shortfall_still_builds() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(25);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();
        chain.set_decoys(300_000_000, vec![decoy(101)]);

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 5, 100, &mut rng,
        )
        .unwrap();
        assert_eq!(bundle.input.key_inputs[0].ring.len(), 2);
    }

    #[test]
    fn key_images_are_deterministic_per_output() {
        let oracle = MockOracle;
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();

        let mut rng = StdRng::seed_from_u64(26);
        let first = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 0, 100, &mut rng,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(27);
        let second = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 0, 100, &mut rng,
        )
        .unwrap();
        assert_eq!(
            first.input.key_inputs[0].key_image,
            second.input.key_inputs[0].key_image
        );
    }

    #[test]
    fn unused_decoy_response_amounts_are_skipped() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(28);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();
        // Decoys exist only for a denomination we never ask about.
        chain.set_decoys(500_000_000, vec![decoy(101), decoy(102)]);

        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 5, 100, &mut rng,
        )
        .unwrap();
        // Mismatched amounts contribute nothing; the ring is just the
        // real output.
        assert_eq!(bundle.input.key_inputs[0].ring.len(), 1);
    }
}
