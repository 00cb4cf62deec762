//! Amount decomposition into mix-friendly denominations.
//!
//! Ring mixing needs decoys of the exact same denomination, so every
//! privacy output amount is split into chunks of the form `d * 10^k` with
//! `d` in {1, 2, 5}. Low digits that together stay under the dust
//! threshold are folded into a single dust chunk instead, emitted first.
//! The result is deterministic: dust chunk (if any), then ascending
//! decades, each decade split per the canonical 1/2/5 table.

/// Split `amount` into canonical denominations.
///
/// Returns the empty vector for zero. The returned chunks always sum back
/// to `amount`.
pub fn decompose_amount(mut amount: u64, dust_threshold: u64) -> Vec<u64> {
    let mut res = Vec::new();
    if amount == 0 {
        return res;
    }

    let mut dust_handled = false;
    let mut dust = 0u64;
    let mut order = 1u64;

    while amount != 0 {
        let decade = order;
        let chunk = (amount % 10) * decade;
        amount /= 10;
        order = order.saturating_mul(10);

        if dust + chunk < dust_threshold {
            dust += chunk;
        } else {
            if !dust_handled && dust != 0 {
                res.push(dust);
                dust_handled = true;
            }
            if chunk != 0 {
                res.extend(decompose_decade(chunk, decade));
            }
        }
    }

    // The whole amount stayed under the threshold.
    if !dust_handled && dust != 0 {
        res.push(dust);
    }

    res
}

/// Split a single decade chunk into 1/2/5 denominations.
///
/// `chunk` must be `digit * decade` for a decimal digit; digits 1, 2 and 5
/// pass through unchanged, the rest break down into at most three terms.
fn decompose_decade(chunk: u64, decade: u64) -> Vec<u64> {
    if decade == 0 {
        return Vec::new();
    }
    let digit = chunk / decade;
    match digit {
        3 => vec![decade, 2 * decade],
        4 => vec![2 * decade, 2 * decade],
        6 => vec![5 * decade, decade],
        7 => vec![5 * decade, 2 * decade],
        8 => vec![5 * decade, 2 * decade, decade],
        9 => vec![5 * decade, 2 * decade, 2 * decade],
        _ => vec![digit * decade],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DUST_THRESHOLD;

    #[test]
    fn zero_decomposes_to_nothing() {
        assert!(decompose_amount(0, DUST_THRESHOLD).is_empty());
    }

    #[test]
    fn dust_only_amount_is_one_chunk() {
        assert_eq!(decompose_amount(455_827, DUST_THRESHOLD), vec![455_827]);
        assert_eq!(decompose_amount(1, DUST_THRESHOLD), vec![1]);
        assert_eq!(decompose_amount(999_999, DUST_THRESHOLD), vec![999_999]);
    }

    #[test]
    fn digit_three_splits_into_one_plus_two() {
        assert_eq!(
            decompose_amount(300_000_000, DUST_THRESHOLD),
            vec![100_000_000, 200_000_000]
        );
    }

    #[test]
    fn single_digit_denominations_pass_through() {
        assert_eq!(decompose_amount(100_000_000, DUST_THRESHOLD), vec![100_000_000]);
        assert_eq!(decompose_amount(200_000_000, DUST_THRESHOLD), vec![200_000_000]);
        assert_eq!(decompose_amount(500_000_000, DUST_THRESHOLD), vec![500_000_000]);
    }

    #[test]
    fn mixed_amount_emits_dust_first_then_ascending_decades() {
        assert_eq!(
            decompose_amount(62_387_455_827, DUST_THRESHOLD),
            vec![
                455_827,
                5_000_000,
                2_000_000,
                50_000_000,
                20_000_000,
                10_000_000,
                100_000_000,
                200_000_000,
                2_000_000_000,
                50_000_000_000,
                10_000_000_000,
            ]
        );
    }

    #[test]
    fn change_amount_splits_per_decade() {
        // 99_000_000: two non-dust decades, 9 -> 5 + 2 + 2 each.
        assert_eq!(
            decompose_amount(99_000_000, DUST_THRESHOLD),
            vec![
                5_000_000, 2_000_000, 2_000_000, 50_000_000, 20_000_000, 20_000_000
            ]
        );
    }

    #[test]
    fn every_digit_breakdown_sums_back() {
        for digit in 1u64..=9 {
            let amount = digit * 100_000_000;
            let parts = decompose_amount(amount, DUST_THRESHOLD);
            assert_eq!(parts.iter().sum::<u64>(), amount, "digit {digit}");
            for part in parts {
                let lead = part / 100_000_000;
                assert!(matches!(lead, 1 | 2 | 5), "digit {digit} produced {part}");
            }
        }
    }

    #[test]
    fn decomposition_preserves_the_amount() {
        let threshold = DUST_THRESHOLD;
        for amount in (0u64..5_000).chain([
            999_999,
            1_000_000,
            1_000_001,
            123_456_789,
            987_654_321_000,
            62_387_455_827,
            u64::from(u32::MAX),
        ]) {
            let parts = decompose_amount(amount, threshold);
            assert_eq!(parts.iter().sum::<u64>(), amount, "amount {amount}");
        }
    }

    #[test]
    fn chunks_are_dust_or_canonical() {
        let threshold = DUST_THRESHOLD;
        for amount in [62_387_455_827u64, 123_456_789, 999_999_999_999, 70_000_001] {
            let parts = decompose_amount(amount, threshold);
            let mut seen_non_dust = false;
            for part in parts {
                if part < threshold {
                    // Dust is only legal as the very first chunk.
                    assert!(!seen_non_dust, "late dust chunk {part} for {amount}");
                    continue;
                }
                seen_non_dust = true;
                let mut lead = part;
                while lead % 10 == 0 {
                    lead /= 10;
                }
                assert!(matches!(lead, 1 | 2 | 5), "non-canonical {part} for {amount}");
            }
        }
    }
}
