//! One-time output construction.
//!
//! A single ephemeral key pair covers the whole transaction; each output
//! derives its one-time address from the recipient's public pair and the
//! output's position in the final vector. Transfer denominations come
//! first, change follows, and the index sequence runs across both so the
//! receiver's scan arithmetic lines up. Fees never materialize as
//! outputs; they burn at execution.

use rand_core::CryptoRngCore;
use tracing::debug;

use crate::{
    amount::decompose_amount,
    crypto::RingCrypto,
    error::WalletError,
    keys::PublicKeyPair,
    types::{KeyOutput, PrivacyOutput, DUST_THRESHOLD},
};

/// Build the output vector for a transfer of `transfer_amount`, with
/// change for whatever `selected_total` leaves over after the fee.
///
/// `transfer_to` may be `None` only when `transfer_amount` is zero (a
/// public payout leaves change as the only privacy outputs); likewise
/// `change_to` may be `None` when the amounts cancel exactly.
pub fn generate_outputs(
    crypto: &dyn RingCrypto,
    rng: &mut dyn CryptoRngCore,
    transfer_to: Option<&PublicKeyPair>,
    change_to: Option<&PublicKeyPair>,
    transfer_amount: u64,
    selected_total: u64,
    fee: u64,
) -> Result<PrivacyOutput, WalletError> {
    let spendable = selected_total
        .checked_sub(fee)
        .ok_or(WalletError::InsufficientBalance {
            available: selected_total,
            required: fee,
        })?;
    let change_amount =
        spendable
            .checked_sub(transfer_amount)
            .ok_or(WalletError::InsufficientBalance {
                available: selected_total,
                required: transfer_amount.saturating_add(fee),
            })?;

    let transfer_denoms = if transfer_amount > 0 {
        decompose_amount(transfer_amount, DUST_THRESHOLD)
    } else {
        Vec::new()
    };
    let change_denoms = if change_amount > 0 {
        decompose_amount(change_amount, DUST_THRESHOLD)
    } else {
        Vec::new()
    };
    debug!(
        transfer_amount,
        change_amount,
        transfer_chunks = transfer_denoms.len(),
        change_chunks = change_denoms.len(),
        "decomposed output amounts"
    );

    let transfer_to = match (&transfer_denoms, transfer_to) {
        (denoms, Some(pair)) if !denoms.is_empty() => Some(pair),
        (denoms, _) if denoms.is_empty() => None,
        _ => return Err(WalletError::InvalidParams("transfer outputs need a recipient")),
    };
    let change_to = match (&change_denoms, change_to) {
        (denoms, Some(pair)) if !denoms.is_empty() => Some(pair),
        (denoms, _) if denoms.is_empty() => None,
        _ => return Err(WalletError::InvalidParams("change outputs need a change address")),
    };

    let (eph_priv, eph_pub) = crypto.generate_key_pair(rng);
    let mut key_outputs = Vec::with_capacity(transfer_denoms.len() + change_denoms.len());

    if let Some(pair) = transfer_to {
        for &denom in &transfer_denoms {
            let index = key_outputs.len() as u64;
            let one_time =
                crypto.one_time_address(&pair.view_pub, &pair.spend_pub, &eph_priv, index)?;
            key_outputs.push(KeyOutput {
                amount: denom,
                one_time_pub_key: one_time,
            });
        }
    }
    if let Some(pair) = change_to {
        for &denom in &change_denoms {
            let index = key_outputs.len() as u64;
            let one_time =
                crypto.one_time_address(&pair.view_pub, &pair.spend_pub, &eph_priv, index)?;
            key_outputs.push(KeyOutput {
                amount: denom,
                one_time_pub_key: one_time,
            });
        }
    }

    Ok(PrivacyOutput {
        r_tx_pub: eph_pub,
        key_outputs,
    })
}

/// Build `count` outputs of a single denomination for batch minting.
pub fn generate_custom_outputs(
    crypto: &dyn RingCrypto,
    rng: &mut dyn CryptoRngCore,
    to: &PublicKeyPair,
    unit: u64,
    count: u32,
) -> Result<PrivacyOutput, WalletError> {
    let (eph_priv, eph_pub) = crypto.generate_key_pair(rng);
    let mut key_outputs = Vec::with_capacity(count as usize);
    for index in 0..u64::from(count) {
        let one_time = crypto.one_time_address(&to.view_pub, &to.spend_pub, &eph_priv, index)?;
        key_outputs.push(KeyOutput {
            amount: unit,
            one_time_pub_key: one_time,
        });
    }
    Ok(PrivacyOutput {
        r_tx_pub: eph_pub,
        key_outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_pair_with_keys, MockOracle};
    use crate::types::COIN;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn transfer_then_change_with_continuing_indexes() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(5);
        let (recv_keys, recv_pair) = mock_pair_with_keys(&oracle, 1);
        let (change_keys, change_pair) = mock_pair_with_keys(&oracle, 2);

        // selected 5 COIN, transfer 4 COIN, fee 0.01 COIN.
        let output = generate_outputs(
            &oracle,
            &mut rng,
            Some(&recv_pair),
            Some(&change_pair),
            4 * COIN,
            5 * COIN,
            1_000_000,
        )
        .unwrap();

        let amounts: Vec<u64> = output.key_outputs.iter().map(|o| o.amount).collect();
        assert_eq!(
            amounts,
            vec![
                2 * COIN,
                2 * COIN,
                5_000_000,
                2_000_000,
                2_000_000,
                50_000_000,
                20_000_000,
                20_000_000,
            ]
        );
        // Everything that left the inputs shows up as outputs plus the
        // burned fee.
        assert_eq!(amounts.iter().sum::<u64>() + 1_000_000, 5 * COIN);

        // Each output recovers under the right keys at its final index.
        for (i, out) in output.key_outputs.iter().enumerate() {
            let keys = if i < 2 { &recv_keys } else { &change_keys };
            let priv_key = oracle
                .recover_one_time_key(
                    &output.r_tx_pub,
                    &keys.view_priv,
                    &keys.spend_priv,
                    i as u64,
                )
                .unwrap();
            assert_eq!(oracle.public_key(&priv_key), out.one_time_pub_key);
        }
    }

    #[test]
    fn change_only_layout_for_public_payout() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(6);
        let (_, change_pair) = mock_pair_with_keys(&oracle, 3);

        // selected_total here is already the post-transfer remainder.
        let output = generate_outputs(
            &oracle,
            &mut rng,
            None,
            Some(&change_pair),
            0,
            COIN,
            1_000_000,
        )
        .unwrap();
        let total: u64 = output.key_outputs.iter().map(|o| o.amount).sum();
        assert_eq!(total, COIN - 1_000_000);
    }

    #[test]
    fn exact_spend_produces_no_outputs_for_missing_change_address() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(7);
        let (_, recv_pair) = mock_pair_with_keys(&oracle, 4);

        let output =
            generate_outputs(&oracle, &mut rng, Some(&recv_pair), None, COIN, COIN, 0).unwrap();
        assert_eq!(output.key_outputs.len(), 1);
        assert_eq!(output.key_outputs[0].amount, COIN);
    }

    #[test]
    fn missing_recipient_is_rejected() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(8);
        match generate_outputs(&oracle, &mut rng, None, None, COIN, COIN, 0) {
            Err(WalletError::InvalidParams(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn overspend_is_rejected() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(9);
        let (_, pair) = mock_pair_with_keys(&oracle, 5);
        match generate_outputs(&oracle, &mut rng, Some(&pair), None, 2 * COIN, COIN, 1) {
            Err(WalletError::InsufficientBalance { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn custom_outputs_mint_uniform_denominations() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(10);
        let (keys, pair) = mock_pair_with_keys(&oracle, 6);

        let output = generate_custom_outputs(&oracle, &mut rng, &pair, COIN, 5).unwrap();
        assert_eq!(output.key_outputs.len(), 5);
        assert!(output.key_outputs.iter().all(|o| o.amount == COIN));
        // Distinct one-time keys per index.
        let mut keys_seen: Vec<_> = output
            .key_outputs
            .iter()
            .map(|o| o.one_time_pub_key)
            .collect();
        keys_seen.sort();
        keys_seen.dedup();
        assert_eq!(keys_seen.len(), 5);

        let priv_key = oracle
            .recover_one_time_key(&output.r_tx_pub, &keys.view_priv, &keys.spend_priv, 3)
            .unwrap();
        assert_eq!(
            oracle.public_key(&priv_key),
            output.key_outputs[3].one_time_pub_key
        );
    }
}
