//! Transaction signing.
//!
//! Ring-signed transactions bind the canonical transaction hash (the
//! serialized envelope with the signature cleared) with one ring item per
//! input. Public-sender transactions go through [`TxSigner`], the seam to
//! whatever conventional key scheme the surrounding application uses.

use rand_core::CryptoRngCore;

use crate::{
    crypto::RingCrypto,
    error::WalletError,
    types::{
        contract_pub_key, PrivacyInput, RealKeyInput, RingSignature, SigType, Signature, Tx,
        UtxoBasic, PRIVACY_CONTRACT,
    },
};

/// Conventional signer of a public sender.
pub trait TxSigner {
    fn sign(&self, msg: &[u8]) -> Vec<u8>;
    fn public_key_bytes(&self) -> Vec<u8>;
}

/// Sign with a public sender's conventional key.
pub fn sign_tx_plain(signer: &dyn TxSigner, tx: &mut Tx) -> Result<(), WalletError> {
    tx.signature = None;
    let bytes = tx.canonical_bytes()?;
    tx.signature = Some(Signature {
        sig_type: SigType::Ed25519,
        signature: signer.sign(&bytes),
        pub_key: signer.public_key_bytes(),
    });
    Ok(())
}

/// Produce one ring signature per input over the canonical tx hash.
///
/// `rings` and `real_keys` must line up one-to-one with the key inputs,
/// and each ring must list members in exactly the key input's index
/// order; a permuted ring would sign a different member sequence than
/// the wire announces and verification would fail.
pub fn sign_tx_ring(
    crypto: &dyn RingCrypto,
    rng: &mut dyn CryptoRngCore,
    tx: &mut Tx,
    input: &PrivacyInput,
    rings: &[Vec<UtxoBasic>],
    real_keys: &[RealKeyInput],
) -> Result<(), WalletError> {
    if rings.len() != input.key_inputs.len() || real_keys.len() != input.key_inputs.len() {
        return Err(WalletError::InvalidParams(
            "ring material does not match the input count",
        ));
    }

    tx.signature = None;
    let msg_hash = tx.hash()?;

    let mut items = Vec::with_capacity(input.key_inputs.len());
    for (i, key_input) in input.key_inputs.iter().enumerate() {
        let ring = &rings[i];
        if ring.len() != key_input.ring.len()
            || ring
                .iter()
                .zip(&key_input.ring)
                .any(|(member, index)| member.global_index != *index)
        {
            return Err(WalletError::InvalidParams(
                "ring order diverges from the key input",
            ));
        }
        let ring_pubs: Vec<_> = ring.iter().map(|member| member.one_time_pub_key).collect();
        let item = crypto.ring_sign(
            msg_hash.as_bytes(),
            &ring_pubs,
            &real_keys[i].one_time_priv_key,
            real_keys[i].real_position as usize,
            &key_input.key_image,
            rng,
        )?;
        items.push(item);
    }

    let ring_signature = RingSignature { items };
    tx.signature = Some(Signature {
        sig_type: SigType::RingBaseEd25519,
        signature: bincode::serialize(&ring_signature)?,
        pub_key: contract_pub_key(PRIVACY_CONTRACT),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_ring_verify, MockChain, MockOracle, MockSigner};
    use crate::{inputs::build_input, test_utils::seeded_wallet_store};
    use rand::{rngs::StdRng, SeedableRng};

    fn signable_tx() -> Tx {
        Tx {
            execer: PRIVACY_CONTRACT.to_string(),
            payload: vec![1, 2, 3],
            fee: 0,
            nonce: 9,
            to: "someone".to_string(),
            expire: 0,
            signature: None,
        }
    }

    #[test]
    fn plain_signature_carries_the_signer_key() {
        let mut tx = signable_tx();
        sign_tx_plain(&MockSigner, &mut tx).unwrap();
        let sig = tx.signature.as_ref().unwrap();
        assert_eq!(sig.sig_type, SigType::Ed25519);
        assert_eq!(sig.pub_key, MockSigner.public_key_bytes());
        assert!(!sig.signature.is_empty());
    }

    #[test]
    fn ring_signature_binds_ring_order() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(31);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();
        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 0, 100, &mut rng,
        )
        .unwrap();

        let mut tx = signable_tx();
        sign_tx_ring(
            &oracle,
            &mut rng,
            &mut tx,
            &bundle.input,
            &bundle.rings,
            &bundle.real_keys,
        )
        .unwrap();

        let sig = tx.signature.clone().unwrap();
        assert_eq!(sig.sig_type, SigType::RingBaseEd25519);
        assert_eq!(sig.pub_key, contract_pub_key(PRIVACY_CONTRACT));

        let ring_sig: RingSignature = bincode::deserialize(&sig.signature).unwrap();
        assert_eq!(ring_sig.items.len(), 1);

        // Verifies against the same ring, fails against a permuted one.
        let msg = {
            let mut unsigned = tx.clone();
            unsigned.signature = None;
            unsigned.hash().unwrap()
        };
        let ring_pubs: Vec<_> = bundle.rings[0]
            .iter()
            .map(|m| m.one_time_pub_key)
            .collect();
        assert!(mock_ring_verify(
            &ring_sig.items[0],
            msg.as_bytes(),
            &ring_pubs,
            &bundle.input.key_inputs[0].key_image,
        ));
        let mut reversed = ring_pubs.clone();
        reversed.reverse();
        if reversed != ring_pubs {
            assert!(!mock_ring_verify(
                &ring_sig.items[0],
                msg.as_bytes(),
                &reversed,
                &bundle.input.key_inputs[0].key_image,
            ));
        }
    }

    #[test]
    fn mismatched_ring_material_is_rejected() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(32);
        let (_dir, store, keys) = seeded_wallet_store(&oracle, "alice", &[300_000_000], 10);
        let chain = MockChain::new();
        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 300_000_000, 0, 100, &mut rng,
        )
        .unwrap();

        let mut tx = signable_tx();
        match sign_tx_ring(&oracle, &mut rng, &mut tx, &bundle.input, &[], &bundle.real_keys) {
            Err(WalletError::InvalidParams(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reordered_ring_is_rejected_before_signing() {
        let oracle = MockOracle;
        let mut rng = StdRng::seed_from_u64(33);
        let (_dir, store, keys) =
            seeded_wallet_store(&oracle, "alice", &[300_000_000, 200_000_000], 10);
        let chain = MockChain::new();
        let bundle = build_input(
            &store, &chain, &oracle, &keys, "VEIL", "alice", 500_000_000, 0, 100, &mut rng,
        )
        .unwrap();

        // Swap the two singleton rings so they disagree with the inputs.
        let mut rings = bundle.rings.clone();
        rings.swap(0, 1);
        let mut tx = signable_tx();
        match sign_tx_ring(&oracle, &mut rng, &mut tx, &bundle.input, &rings, &bundle.real_keys) {
            Err(WalletError::InvalidParams(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
