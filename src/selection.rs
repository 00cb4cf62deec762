//! UTXO selection under the maturity policy.
//!
//! Deep-enough outputs are preferred; shallow ones are only drafted (old
//! to new) when the matured balance cannot cover the target. The final
//! pick over the eligible pool is uniformly random without replacement,
//! so input-selection order never links transactions, and the returned
//! set is sorted by ascending amount for the input builder.

use rand::Rng;

use crate::{
    error::WalletError,
    store::OwnedUtxo,
    types::MATURITY_DEPTH,
};

/// Choose a subset of `candidates` whose amounts sum to at least
/// `target`.
pub fn select_utxos<R: Rng + ?Sized>(
    candidates: &[OwnedUtxo],
    current_height: i64,
    target: u64,
    rng: &mut R,
) -> Result<Vec<OwnedUtxo>, WalletError> {
    let mut confirmed: Vec<&OwnedUtxo> = Vec::new();
    let mut unconfirmed: Vec<&OwnedUtxo> = Vec::new();
    let mut balance: u64 = 0;

    for utxo in candidates {
        if current_height < utxo.height {
            continue;
        }
        if current_height - utxo.height > MATURITY_DEPTH {
            balance += utxo.amount;
            confirmed.push(utxo);
        } else {
            unconfirmed.push(utxo);
        }
    }

    if balance < target && !unconfirmed.is_empty() {
        // Matured outputs cannot cover the target; draft shallow ones,
        // oldest first, since those are the least likely to reorg away.
        unconfirmed.sort_by_key(|u| u.height);
        for utxo in unconfirmed {
            confirmed.push(utxo);
            balance += utxo.amount;
            if balance >= target {
                break;
            }
        }
    }

    if balance < target {
        return Err(WalletError::InsufficientBalance {
            available: balance,
            required: target,
        });
    }

    let mut pool = confirmed;
    let mut picked_total: u64 = 0;
    let mut selected: Vec<OwnedUtxo> = Vec::new();
    while picked_total < target {
        let index = rng.gen_range(0..pool.len());
        let utxo = pool.swap_remove(index);
        picked_total += utxo.amount;
        selected.push(utxo.clone());
    }

    selected.sort_by_key(|u| u.amount);
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublicKey, TxHash};
    use rand::{rngs::StdRng, SeedableRng};

    fn utxo(n: u8, amount: u64, height: i64) -> OwnedUtxo {
        OwnedUtxo {
            tx_hash: TxHash::from([n; 32]),
            out_index: 0,
            token: "VEIL".to_string(),
            owner: "alice".to_string(),
            amount,
            r_tx_pub: PublicKey::from([n; 32]),
            one_time_pub_key: PublicKey::from([n; 32]),
            height,
            tx_index: 0,
        }
    }

    #[test]
    fn covers_target_and_sorts_ascending() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = vec![utxo(1, 300, 10), utxo(2, 200, 11), utxo(3, 500, 12)];
        let selected = select_utxos(&candidates, 100, 900, &mut rng).unwrap();
        let total: u64 = selected.iter().map(|u| u.amount).sum();
        assert!(total >= 900);
        let amounts: Vec<u64> = selected.iter().map(|u| u.amount).collect();
        let mut sorted = amounts.clone();
        sorted.sort_unstable();
        assert_eq!(amounts, sorted);
    }

    #[test]
    fn insufficient_balance_reports_pool_total() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = vec![utxo(1, 300, 10), utxo(2, 200, 11)];
        match select_utxos(&candidates, 100, 900, &mut rng) {
            Err(WalletError::InsufficientBalance { available, required }) => {
                assert_eq!(available, 500);
                assert_eq!(required, 900);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn matured_outputs_cover_without_touching_shallow_ones() {
        let mut rng = StdRng::seed_from_u64(1);
        // Heights 95..100 are within MATURITY_DEPTH of 100 and stay out
        // of the pool while matured outputs suffice.
        let candidates = vec![utxo(1, 500, 10), utxo(2, 500, 20), utxo(3, 500, 95)];
        for _ in 0..20 {
            let selected = select_utxos(&candidates, 100, 600, &mut rng).unwrap();
            assert!(selected.iter().all(|u| u.height <= 20));
        }
    }

    #[test]
    fn shallow_outputs_fill_in_oldest_first() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = vec![
            utxo(1, 500, 10),
            utxo(2, 300, 99),
            utxo(3, 300, 95),
        ];
        // 500 matured is short of 700; the height-95 output joins first.
        let selected = select_utxos(&candidates, 100, 700, &mut rng).unwrap();
        let total: u64 = selected.iter().map(|u| u.amount).sum();
        assert!(total >= 700);
        assert!(!selected.iter().any(|u| u.height == 99));
    }

    #[test]
    fn future_heights_are_ignored() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = vec![utxo(1, 500, 200), utxo(2, 500, 10)];
        match select_utxos(&candidates, 100, 600, &mut rng) {
            Err(WalletError::InsufficientBalance { available, .. }) => assert_eq!(available, 500),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn no_duplicate_picks() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates: Vec<OwnedUtxo> =
            (0..20).map(|n| utxo(n as u8, 100, n as i64)).collect();
        let selected = select_utxos(&candidates, 100, 1_500, &mut rng).unwrap();
        let mut hashes: Vec<TxHash> = selected.iter().map(|u| u.tx_hash).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), selected.len());
    }
}
