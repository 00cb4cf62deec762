//! Chain event handling: output discovery, spend reconciliation, reorg
//! rollback and frozen-spend expiry.
//!
//! Handlers here never raise to the event loop; a malformed transaction
//! is logged and skipped, a store hiccup is logged and the rest of the
//! batch proceeds. All writes land in the caller's transaction so each
//! block, timer tick or rescan page commits atomically.

use std::collections::HashMap;

use lmdb::RwTransaction;
use tracing::{debug, info, warn};

use crate::{
    chain::{ChainClient, ChainHeader, TxDetail},
    crypto::RingCrypto,
    error::StoreError,
    keys::PrivacyKeys,
    store::{OwnedUtxo, SpentTx, WalletStore},
    types::{PrivacyAction, TxHash, UtxoGlobalIndex, PRIVACY_CONTRACT},
};

/// Addresses the scanner recognizes, with their decrypted key pairs.
pub(crate) type ScanAccounts = Vec<(String, PrivacyKeys)>;

fn decode_privacy_tx(detail: &TxDetail) -> Option<(PrivacyAction, TxHash)> {
    if detail.tx.execer != PRIVACY_CONTRACT {
        return None;
    }
    let action = match detail.tx.action() {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "skipping undecodable privacy payload");
            return None;
        }
    };
    let tx_hash = match detail.tx.hash() {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "skipping unhashable transaction");
            return None;
        }
    };
    Some((action, tx_hash))
}

/// Handle one confirmed transaction: persist scan-matched outputs and
/// buffer every input ring member for reconciliation.
pub(crate) fn process_confirmed_tx(
    store: &WalletStore,
    crypto: &dyn RingCrypto,
    accounts: &ScanAccounts,
    detail: &TxDetail,
    txn: &mut RwTransaction<'_>,
) {
    let Some((action, tx_hash)) = decode_privacy_tx(detail) else {
        return;
    };
    let output = action.output();
    let mut matched = vec![false; output.key_outputs.len()];

    for (owner, keys) in accounts {
        for (index, key_output) in output.key_outputs.iter().enumerate() {
            if matched[index] {
                continue;
            }
            let Ok(one_time_priv) = crypto.recover_one_time_key(
                &output.r_tx_pub,
                &keys.view_priv,
                &keys.spend_priv,
                index as u64,
            ) else {
                continue;
            };
            if crypto.public_key(&one_time_priv) != key_output.one_time_pub_key {
                continue;
            }
            matched[index] = true;
            if !detail.exec_ok {
                continue;
            }

            let record = OwnedUtxo {
                tx_hash,
                out_index: index as u32,
                token: action.token().to_string(),
                owner: owner.clone(),
                amount: key_output.amount,
                r_tx_pub: output.r_tx_pub,
                one_time_pub_key: key_output.one_time_pub_key,
                height: detail.height,
                tx_index: detail.index,
            };
            match store.set_utxo(txn, &record) {
                Ok(true) => {
                    info!(%tx_hash, index, owner = %owner, amount = key_output.amount, "discovered own output");
                }
                Ok(false) => {
                    debug!(%tx_hash, index, "output already recorded");
                }
                Err(e) => {
                    warn!(error = %e, %tx_hash, index, "failed to persist discovered output");
                }
            }
        }
    }

    if let Some(input) = action.input() {
        let indexes: Vec<UtxoGlobalIndex> = input
            .key_inputs
            .iter()
            .flat_map(|key_input| key_input.ring.iter().copied())
            .collect();
        if !indexes.is_empty() {
            if let Err(e) = store.store_scan_candidates(txn, &tx_hash, &indexes) {
                warn!(error = %e, %tx_hash, "failed to buffer observed spends");
            }
        }
    }
}

/// Handle one reverted transaction: drop own outputs it created and
/// suspend its confirmed spends until it is re-mined or expires.
#[allow(clippy::too_many_arguments)]
pub(crate) fn process_reverted_tx(
    store: &WalletStore,
    crypto: &dyn RingCrypto,
    accounts: &ScanAccounts,
    detail: &TxDetail,
    header: &ChainHeader,
    expire_secs: u64,
    block_interval_secs: u64,
    txn: &mut RwTransaction<'_>,
) {
    let Some((action, tx_hash)) = decode_privacy_tx(detail) else {
        return;
    };
    let output = action.output();

    for (_owner, keys) in accounts {
        for (index, key_output) in output.key_outputs.iter().enumerate() {
            let Ok(one_time_priv) = crypto.recover_one_time_key(
                &output.r_tx_pub,
                &keys.view_priv,
                &keys.spend_priv,
                index as u64,
            ) else {
                continue;
            };
            if crypto.public_key(&one_time_priv) != key_output.one_time_pub_key {
                continue;
            }
            if !detail.exec_ok {
                continue;
            }
            let global_index = UtxoGlobalIndex {
                tx_hash,
                out_index: index as u32,
            };
            match store.delete_own_utxo(txn, &global_index) {
                Ok(true) => info!(%tx_hash, index, "rolled back own output"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, %tx_hash, index, "failed to roll back output"),
            }
        }
    }

    if action.input().is_some() {
        if let Err(e) = store.remove_scan_candidates_for(txn, &tx_hash) {
            warn!(error = %e, %tx_hash, "failed to drop buffered spends");
        }
        for (owner, _) in accounts {
            match store.move_stxo_to_revert_ftxo(
                txn,
                action.token(),
                owner,
                &tx_hash,
                header,
                expire_secs,
                block_interval_secs,
            ) {
                Ok(true) => info!(%tx_hash, owner = %owner, "suspended reverted spend"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, %tx_hash, "failed to suspend reverted spend"),
            }
        }
    }
}

/// Drain up to `limit` buffered spend candidates, promoting entries the
/// wallet owns to the spent bucket. Returns how many candidates were
/// consumed.
pub(crate) fn reconcile_scan_candidates(
    store: &WalletStore,
    txn: &mut RwTransaction<'_>,
    limit: usize,
) -> Result<usize, StoreError> {
    let candidates = store.list_scan_candidates(&*txn, limit)?;
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut groups: HashMap<(String, String, TxHash), Vec<OwnedUtxo>> = HashMap::new();
    for candidate in &candidates {
        if let Some(record) = store.get_utxo(&*txn, &candidate.global_index)? {
            groups
                .entry((
                    record.token.clone(),
                    record.owner.clone(),
                    candidate.spending_tx_hash,
                ))
                .or_default()
                .push(record);
        }
        store.delete_scan_candidate(txn, &candidate.global_index)?;
    }

    for ((token, owner, spender), utxos) in groups {
        // A frozen record for this spend means the wallet built it; the
        // revert bucket means a reorg suspended it and it got re-mined.
        if store.move_ftxo_to_stxo(txn, false, &token, &owner, &spender)? {
            info!(tx_hash = %spender, owner = %owner, "frozen spend confirmed");
            continue;
        }
        if store.move_ftxo_to_stxo(txn, true, &token, &owner, &spender)? {
            info!(tx_hash = %spender, owner = %owner, "suspended spend re-mined");
            continue;
        }
        if store.get_spent(&*txn, &token, &owner, &spender)?.is_some() {
            continue;
        }
        info!(tx_hash = %spender, owner = %owner, count = utxos.len(), "outputs spent elsewhere");
        store.move_utxo_to_stxo(
            txn,
            &SpentTx {
                token,
                owner,
                tx_hash: spender,
                tx_bytes: Vec::new(),
                utxos,
            },
        )?;
    }

    Ok(candidates.len())
}

/// Walk the frozen and revert-frozen buckets; entries past their expiry
/// whose transaction the chain does not know go back to available.
pub(crate) fn expire_frozen(
    store: &WalletStore,
    chain: &dyn ChainClient,
    header: &ChainHeader,
    txn: &mut RwTransaction<'_>,
) {
    for revert in [false, true] {
        let frozen = match store.list_all_frozen(&*txn, revert) {
            Ok(frozen) => frozen,
            Err(e) => {
                warn!(error = %e, revert, "failed to list frozen spends");
                continue;
            }
        };
        for entry in frozen {
            if !entry.is_expired(header.height, header.block_time) {
                continue;
            }
            // Leave the entry frozen unless the chain positively does
            // not know the transaction; a query failure is not "gone".
            let chain_knows = match chain.query_tx(&entry.tx_hash) {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!(error = %e, tx_hash = %entry.tx_hash, "expiry lookup failed");
                    true
                }
            };
            match store.move_ftxo_to_utxo(
                txn,
                revert,
                &entry.token,
                &entry.owner,
                &entry.tx_hash,
                |_| !chain_knows,
            ) {
                Ok(true) => {
                    info!(tx_hash = %entry.tx_hash, owner = %entry.owner, "expired frozen spend restored");
                }
                Ok(false) => {
                    debug!(tx_hash = %entry.tx_hash, "expired spend still known to the chain");
                }
                Err(e) => warn!(error = %e, tx_hash = %entry.tx_hash, "failed to restore frozen spend"),
            }
        }
    }
}
