//! The wallet: public entry points over the privacy engine.
//!
//! One mutex guards the mutable core; every entry point, the block
//! handlers and the expiry timer run straight-line to completion under
//! it, chain queries included. The rescan flag lives outside the mutex
//! so builds can fail fast with `RescanInProgress` while a rescan owns
//! the store page by page.

use crossbeam_channel::Receiver;
use lmdb::Transaction;
use rand_core::CryptoRngCore;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};
use tracing::{debug, info, warn};

use crate::{
    chain::{BlockDetail, ChainClient, ChainHeader, TxListRequest},
    crypto::RingCrypto,
    error::{StoreError, WalletError},
    inputs::{build_input, InputBundle},
    keys::{EncryptedPrivacyKeys, PublicKeyPair},
    observer,
    outputs::{generate_custom_outputs, generate_outputs},
    signer::{sign_tx_plain, sign_tx_ring, TxSigner},
    store::{FrozenTx, OwnedUtxo, RescanFlag, SpentTx, WalletStore},
    types::{
        exec_address, ActionKind, PrivacyAction, SigningContext, Tx, TxHash, Utxo, COIN,
        FEE_PER_KB, PRIVACY_CONTRACT, PRIVACY_FEE, SIGNATURE_RESERVE_BYTES,
    },
};

/// Tunables injected at construction.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Default freeze/expiry horizon when a request does not set one.
    pub default_expire_secs: u64,
    /// Expected block cadence; converts the expiry horizon to a height
    /// bound.
    pub block_interval_secs: u64,
    /// Height the privacy contract activated at; rescans do not walk
    /// below it.
    pub privacy_activation_height: i64,
    /// Page size for rescan transaction listings.
    pub rescan_page_size: i32,
    /// Page size for draining the observed-spend buffer.
    pub scan_flush_page: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_expire_secs: 3600,
            block_interval_secs: 15,
            privacy_activation_height: 0,
            rescan_page_size: 100,
            scan_flush_page: 1000,
        }
    }
}

/// Transfer from a public account into one-time outputs.
#[derive(Debug, Clone)]
pub struct PublicToPrivacyRequest {
    pub token: String,
    pub sender: String,
    /// Recipient `view_pub || spend_pub`, hex.
    pub recipient_pair: String,
    pub amount: u64,
    pub note: String,
    pub expire_secs: u64,
}

/// Ring-signed transfer into fresh one-time outputs.
#[derive(Debug, Clone)]
pub struct PrivacyToPrivacyRequest {
    pub token: String,
    pub sender: String,
    pub recipient_pair: String,
    pub amount: u64,
    pub note: String,
    pub mix: u32,
    pub expire_secs: u64,
}

/// Ring-signed payout to a public address.
#[derive(Debug, Clone)]
pub struct PrivacyToPublicRequest {
    pub token: String,
    pub sender: String,
    /// Public receiving address, carried in clear.
    pub to: String,
    pub amount: u64,
    pub note: String,
    pub mix: u32,
    pub expire_secs: u64,
}

/// Batch-mint `count` outputs of `unit` each.
#[derive(Debug, Clone)]
pub struct CreateUtxosRequest {
    pub token: String,
    pub sender: String,
    pub recipient_pair: String,
    pub unit: u64,
    pub count: u32,
    pub note: String,
    pub expire_secs: u64,
}

/// Deferred-signing build request covering all three flavors.
#[derive(Debug, Clone)]
pub struct CreateTxRequest {
    pub kind: ActionKind,
    pub token: String,
    pub from: String,
    /// Public receiver; only meaningful for privacy-to-public.
    pub to: String,
    /// Recipient pair; meaningful for the two flavors with privacy
    /// outputs to a counterparty.
    pub recipient_pair: String,
    pub amount: u64,
    pub note: String,
    pub mix: u32,
    pub expire_secs: u64,
}

/// Available and frozen listings of one `(token, owner)`.
#[derive(Debug, Clone)]
pub struct PrivacyAccountInfo {
    pub available: Vec<Utxo>,
    pub frozen: Vec<Utxo>,
}

struct WalletCore {
    store: WalletStore,
    chain: Box<dyn ChainClient>,
    crypto: Box<dyn RingCrypto>,
    rng: Box<dyn CryptoRngCore + Send>,
    password: String,
    locked: bool,
    config: WalletConfig,
}

/// The privacy wallet.
pub struct Wallet {
    core: Mutex<WalletCore>,
    rescanning: AtomicBool,
}

fn check_privacy_amount(amount: u64) -> Result<(), WalletError> {
    // Privacy amounts stay on the base-unit grid so denominations mix.
    if amount == 0 || amount % COIN != 0 {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}

fn check_token_and_addr(token: &str, addr: &str) -> Result<(), WalletError> {
    if token.is_empty() {
        return Err(WalletError::InvalidParams("token name is empty"));
    }
    if addr.is_empty() {
        return Err(WalletError::InvalidParams("address is empty"));
    }
    Ok(())
}

/// Fee of a public-sender transaction: per started kilobyte over the
/// serialized size plus the signature reserve.
fn public_tx_fee(tx: &Tx) -> Result<u64, WalletError> {
    let size = tx.size()? + SIGNATURE_RESERVE_BYTES;
    Ok(((size as u64 + 1023) >> 10) * FEE_PER_KB)
}

/// Common parameters of the two private-spend assemblers.
struct SpendParams<'a> {
    token: &'a str,
    sender: &'a str,
    amount: u64,
    note: &'a str,
    mix: u32,
    expire_secs: u64,
}

impl WalletCore {
    fn check_status(&self) -> Result<(), WalletError> {
        if self.password.is_empty() {
            return Err(WalletError::WalletNotReady);
        }
        if self.locked {
            return Err(WalletError::WalletLocked);
        }
        Ok(())
    }

    fn effective_expire(&self, requested_secs: u64) -> u64 {
        if requested_secs > 0 {
            requested_secs
        } else {
            self.config.default_expire_secs
        }
    }

    fn privacy_keys_for(&self, addr: &str) -> Result<crate::keys::PrivacyKeys, WalletError> {
        let record = self
            .store
            .get_account(addr)?
            .ok_or(WalletError::InvalidParams(
                "privacy is not enabled for this address",
            ))?;
        record.open(&self.password)
    }

    /// Decrypt scanning keys for `filter` (or every enabled address when
    /// empty); undecryptable records are skipped with a warning.
    fn scan_accounts(&self, filter: &[String]) -> Result<observer::ScanAccounts, WalletError> {
        let mut accounts = Vec::new();
        for (addr, record) in self.store.list_accounts()? {
            if !filter.is_empty() && !filter.iter().any(|a| a == &addr) {
                continue;
            }
            match record.open(&self.password) {
                Ok(keys) => accounts.push((addr, keys)),
                Err(e) => warn!(addr = %addr, error = %e, "cannot decrypt account keys for scan"),
            }
        }
        Ok(accounts)
    }

    /// Assemble an unsigned privacy-to-privacy transaction.
    fn assemble_p2p(
        &mut self,
        params: &SpendParams<'_>,
        recipient: &PublicKeyPair,
    ) -> Result<(Tx, InputBundle, ChainHeader), WalletError> {
        let keys = self.privacy_keys_for(params.sender)?;
        let header = self.chain.last_header()?;
        let target = params
            .amount
            .checked_add(PRIVACY_FEE)
            .ok_or(WalletError::InvalidAmount(params.amount))?;
        let expire_secs = self.effective_expire(params.expire_secs);

        let WalletCore {
            store,
            chain,
            crypto,
            rng,
            ..
        } = self;
        let bundle = build_input(
            store,
            chain.as_ref(),
            crypto.as_ref(),
            &keys,
            params.token,
            params.sender,
            target,
            params.mix,
            header.height,
            &mut **rng,
        )?;
        let selected_total: u64 = bundle.input.key_inputs.iter().map(|k| k.amount).sum();
        let output = generate_outputs(
            crypto.as_ref(),
            &mut **rng,
            Some(recipient),
            Some(&keys.public_pair()),
            params.amount,
            selected_total,
            PRIVACY_FEE,
        )?;

        let action = PrivacyAction::Privacy2Privacy {
            token: params.token.to_string(),
            amount: params.amount,
            note: params.note.to_string(),
            input: bundle.input.clone(),
            output,
        };
        let mut tx = Tx::new_privacy(
            &action,
            exec_address(PRIVACY_CONTRACT),
            rng.next_u64(),
            header.block_time + expire_secs as i64,
        )?;
        tx.fee = PRIVACY_FEE;
        Ok((tx, bundle, header))
    }

    /// Assemble an unsigned privacy-to-public transaction: change is the
    /// only privacy output, the payout travels in clear.
    fn assemble_p2pub(
        &mut self,
        params: &SpendParams<'_>,
        to: &str,
    ) -> Result<(Tx, InputBundle, ChainHeader), WalletError> {
        let keys = self.privacy_keys_for(params.sender)?;
        let header = self.chain.last_header()?;
        let target = params
            .amount
            .checked_add(PRIVACY_FEE)
            .ok_or(WalletError::InvalidAmount(params.amount))?;
        let expire_secs = self.effective_expire(params.expire_secs);

        let WalletCore {
            store,
            chain,
            crypto,
            rng,
            ..
        } = self;
        let bundle = build_input(
            store,
            chain.as_ref(),
            crypto.as_ref(),
            &keys,
            params.token,
            params.sender,
            target,
            params.mix,
            header.height,
            &mut **rng,
        )?;
        let selected_total: u64 = bundle.input.key_inputs.iter().map(|k| k.amount).sum();
        let remainder = selected_total
            .checked_sub(params.amount)
            .ok_or(WalletError::InsufficientBalance {
                available: selected_total,
                required: target,
            })?;
        let output = generate_outputs(
            crypto.as_ref(),
            &mut **rng,
            None,
            Some(&keys.public_pair()),
            0,
            remainder,
            PRIVACY_FEE,
        )?;

        let action = PrivacyAction::Privacy2Public {
            token: params.token.to_string(),
            amount: params.amount,
            note: params.note.to_string(),
            input: bundle.input.clone(),
            output,
        };
        let mut tx = Tx::new_privacy(
            &action,
            to.to_string(),
            rng.next_u64(),
            header.block_time + expire_secs as i64,
        )?;
        tx.fee = PRIVACY_FEE;
        Ok((tx, bundle, header))
    }

    /// Freeze the outputs a pending spend reserves, atomically under the
    /// hash that spends them.
    fn freeze_selected(
        &self,
        token: &str,
        owner: &str,
        tx: &Tx,
        tx_hash: TxHash,
        selected: Vec<OwnedUtxo>,
        header: &ChainHeader,
        expire_secs: u64,
    ) -> Result<(), WalletError> {
        let frozen = FrozenTx::new(
            token.to_string(),
            owner.to_string(),
            tx_hash,
            bincode::serialize(tx).map_err(StoreError::from)?,
            selected,
            header,
            expire_secs,
            self.config.block_interval_secs,
        );
        let mut txn = self.store.rw_txn()?;
        self.store.move_utxo_to_ftxo(&mut txn, &frozen)?;
        txn.commit().map_err(StoreError::from)?;
        Ok(())
    }

    fn ring_sign(
        &mut self,
        tx: &mut Tx,
        input: &crate::types::PrivacyInput,
        rings: &[Vec<crate::types::UtxoBasic>],
        real_keys: &[crate::types::RealKeyInput],
    ) -> Result<(), WalletError> {
        let WalletCore { crypto, rng, .. } = self;
        sign_tx_ring(crypto.as_ref(), &mut **rng, tx, input, rings, real_keys)
    }
}

impl Wallet {
    /// Construct a wallet over its collaborators. The RNG must be a
    /// CSPRNG: it drives selection and decoy permutation.
    pub fn new<R>(
        store: WalletStore,
        chain: Box<dyn ChainClient>,
        crypto: Box<dyn RingCrypto>,
        rng: R,
        password: &str,
        config: WalletConfig,
    ) -> Self
    where
        R: CryptoRngCore + Send + 'static,
    {
        Self {
            core: Mutex::new(WalletCore {
                store,
                chain,
                crypto,
                rng: Box::new(rng),
                password: password.to_string(),
                locked: false,
                config,
            }),
            rescanning: AtomicBool::new(false),
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, WalletCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_not_rescanning(&self) -> Result<(), WalletError> {
        if self.rescanning.load(Ordering::SeqCst) {
            return Err(WalletError::RescanInProgress);
        }
        Ok(())
    }

    /// Relock the wallet; builds fail with `WalletLocked` until
    /// [`Wallet::unlock`].
    pub fn lock(&self) {
        self.lock_core().locked = true;
    }

    pub fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let mut core = self.lock_core();
        if password != core.password {
            return Err(WalletError::WalletLocked);
        }
        core.locked = false;
        Ok(())
    }

    /// Derive and persist privacy keys for `addr` from a 32-byte seed;
    /// returns the hex public pair. Enabling twice is a no-op.
    pub fn enable_privacy(&self, addr: &str, seed: &[u8; 32]) -> Result<String, WalletError> {
        let core = self.lock_core();
        core.check_status()?;
        if addr.is_empty() {
            return Err(WalletError::InvalidParams("address is empty"));
        }
        if let Some(existing) = core.store.get_account(addr)? {
            return Ok(existing.public_pair().to_hex());
        }
        let keys = core.crypto.derive_privacy_keys(seed);
        let record = EncryptedPrivacyKeys::seal(&keys, &core.password)?;
        core.store.put_account(addr, &record)?;
        info!(addr = %addr, "privacy enabled");
        Ok(keys.public_pair().to_hex())
    }

    /// Hex `view_pub || spend_pub` of a privacy-enabled address.
    pub fn public_key_pair(&self, addr: &str) -> Result<String, WalletError> {
        let core = self.lock_core();
        core.check_status()?;
        let keys = core.privacy_keys_for(addr)?;
        Ok(keys.public_pair().to_hex())
    }

    // ----- direct-mode sends -----

    /// Public-to-private transfer: fund one-time outputs from a public
    /// account. No ring inputs, no change; the fee comes out of the
    /// public balance.
    pub fn send_public_to_private(
        &self,
        signer: &dyn TxSigner,
        req: &PublicToPrivacyRequest,
    ) -> Result<TxHash, WalletError> {
        self.ensure_not_rescanning()?;
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;
        check_token_and_addr(&req.token, &req.sender)?;
        check_privacy_amount(req.amount)?;
        let recipient = PublicKeyPair::from_hex(&req.recipient_pair)?;
        let header = core.chain.last_header()?;
        let expire_secs = core.effective_expire(req.expire_secs);

        let (output, nonce) = {
            let WalletCore { crypto, rng, .. } = core;
            let output = generate_outputs(
                crypto.as_ref(),
                &mut **rng,
                Some(&recipient),
                None,
                req.amount,
                req.amount,
                0,
            )?;
            (output, rng.next_u64())
        };
        let action = PrivacyAction::Public2Privacy {
            token: req.token.clone(),
            amount: req.amount,
            note: req.note.clone(),
            output,
        };
        let mut tx = Tx::new_privacy(
            &action,
            exec_address(PRIVACY_CONTRACT),
            nonce,
            header.block_time + expire_secs as i64,
        )?;
        tx.fee = public_tx_fee(&tx)?;
        sign_tx_plain(signer, &mut tx)?;

        core.chain.send_tx(&tx)?;
        let tx_hash = tx.hash()?;
        debug!(%tx_hash, amount = req.amount, "public-to-private submitted");
        Ok(tx_hash)
    }

    /// Batch-mint `count` outputs of one denomination via a single
    /// public-to-private transaction.
    pub fn create_batch_utxos(
        &self,
        signer: &dyn TxSigner,
        req: &CreateUtxosRequest,
    ) -> Result<TxHash, WalletError> {
        self.ensure_not_rescanning()?;
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;
        check_token_and_addr(&req.token, &req.sender)?;
        check_privacy_amount(req.unit)?;
        if req.count == 0 {
            return Err(WalletError::InvalidParams("output count is zero"));
        }
        let total = req
            .unit
            .checked_mul(u64::from(req.count))
            .ok_or(WalletError::InvalidAmount(req.unit))?;
        let recipient = PublicKeyPair::from_hex(&req.recipient_pair)?;
        let header = core.chain.last_header()?;
        let expire_secs = core.effective_expire(req.expire_secs);

        let (output, nonce) = {
            let WalletCore { crypto, rng, .. } = core;
            let output =
                generate_custom_outputs(crypto.as_ref(), &mut **rng, &recipient, req.unit, req.count)?;
            (output, rng.next_u64())
        };
        let action = PrivacyAction::Public2Privacy {
            token: req.token.clone(),
            amount: total,
            note: req.note.clone(),
            output,
        };
        let mut tx = Tx::new_privacy(
            &action,
            exec_address(PRIVACY_CONTRACT),
            nonce,
            header.block_time + expire_secs as i64,
        )?;
        tx.fee = public_tx_fee(&tx)?;
        sign_tx_plain(signer, &mut tx)?;

        core.chain.send_tx(&tx)?;
        let tx_hash = tx.hash()?;
        debug!(%tx_hash, count = req.count, unit = req.unit, "batch mint submitted");
        Ok(tx_hash)
    }

    /// Private-to-private transfer. The selected inputs freeze under
    /// the transaction hash only after the chain accepted the
    /// submission.
    pub fn send_private_to_private(
        &self,
        req: &PrivacyToPrivacyRequest,
    ) -> Result<TxHash, WalletError> {
        self.ensure_not_rescanning()?;
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;
        check_token_and_addr(&req.token, &req.sender)?;
        check_privacy_amount(req.amount)?;
        let recipient = PublicKeyPair::from_hex(&req.recipient_pair)?;

        let params = SpendParams {
            token: &req.token,
            sender: &req.sender,
            amount: req.amount,
            note: &req.note,
            mix: req.mix,
            expire_secs: req.expire_secs,
        };
        let (mut tx, bundle, header) = core.assemble_p2p(&params, &recipient)?;
        core.ring_sign(&mut tx, &bundle.input, &bundle.rings, &bundle.real_keys)?;

        core.chain.send_tx(&tx)?;
        let tx_hash = tx.hash()?;
        core.freeze_selected(
            &req.token,
            &req.sender,
            &tx,
            tx_hash,
            bundle.selected,
            &header,
            core.effective_expire(req.expire_secs),
        )?;
        debug!(%tx_hash, amount = req.amount, mix = req.mix, "private-to-private submitted");
        Ok(tx_hash)
    }

    /// Private-to-public payout.
    pub fn send_private_to_public(
        &self,
        req: &PrivacyToPublicRequest,
    ) -> Result<TxHash, WalletError> {
        self.ensure_not_rescanning()?;
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;
        check_token_and_addr(&req.token, &req.sender)?;
        check_privacy_amount(req.amount)?;
        if req.to.is_empty() {
            return Err(WalletError::InvalidParams("public receiver is empty"));
        }

        let params = SpendParams {
            token: &req.token,
            sender: &req.sender,
            amount: req.amount,
            note: &req.note,
            mix: req.mix,
            expire_secs: req.expire_secs,
        };
        let (mut tx, bundle, header) = core.assemble_p2pub(&params, &req.to)?;
        core.ring_sign(&mut tx, &bundle.input, &bundle.rings, &bundle.real_keys)?;

        core.chain.send_tx(&tx)?;
        let tx_hash = tx.hash()?;
        core.freeze_selected(
            &req.token,
            &req.sender,
            &tx,
            tx_hash,
            bundle.selected,
            &header,
            core.effective_expire(req.expire_secs),
        )?;
        debug!(%tx_hash, amount = req.amount, to = %req.to, "private-to-public submitted");
        Ok(tx_hash)
    }

    // ----- deferred mode -----

    /// Assemble an unsigned transaction plus the signing context a later
    /// [`Wallet::sign_transaction`] consumes. Private flavors freeze
    /// their inputs here, pessimistically, so a concurrent build cannot
    /// select the same outputs.
    pub fn create_transaction(
        &self,
        req: &CreateTxRequest,
    ) -> Result<(Tx, SigningContext), WalletError> {
        self.ensure_not_rescanning()?;
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;
        check_token_and_addr(&req.token, &req.from)?;
        check_privacy_amount(req.amount)?;

        match req.kind {
            ActionKind::Public2Privacy => {
                let recipient = PublicKeyPair::from_hex(&req.recipient_pair)?;
                let header = core.chain.last_header()?;
                let expire_secs = core.effective_expire(req.expire_secs);
                let (output, nonce) = {
                    let WalletCore { crypto, rng, .. } = core;
                    let output = generate_outputs(
                        crypto.as_ref(),
                        &mut **rng,
                        Some(&recipient),
                        None,
                        req.amount,
                        req.amount,
                        0,
                    )?;
                    (output, rng.next_u64())
                };
                let action = PrivacyAction::Public2Privacy {
                    token: req.token.clone(),
                    amount: req.amount,
                    note: req.note.clone(),
                    output,
                };
                let mut tx = Tx::new_privacy(
                    &action,
                    exec_address(PRIVACY_CONTRACT),
                    nonce,
                    header.block_time + expire_secs as i64,
                )?;
                tx.fee = public_tx_fee(&tx)?;
                Ok((
                    tx,
                    SigningContext {
                        kind: ActionKind::Public2Privacy,
                        rings: Vec::new(),
                        real_keys: Vec::new(),
                    },
                ))
            }
            ActionKind::Privacy2Privacy => {
                let recipient = PublicKeyPair::from_hex(&req.recipient_pair)?;
                let params = SpendParams {
                    token: &req.token,
                    sender: &req.from,
                    amount: req.amount,
                    note: &req.note,
                    mix: req.mix,
                    expire_secs: req.expire_secs,
                };
                let (tx, bundle, header) = core.assemble_p2p(&params, &recipient)?;
                let tx_hash = tx.hash()?;
                core.freeze_selected(
                    &req.token,
                    &req.from,
                    &tx,
                    tx_hash,
                    bundle.selected,
                    &header,
                    core.effective_expire(req.expire_secs),
                )?;
                Ok((
                    tx,
                    SigningContext {
                        kind: ActionKind::Privacy2Privacy,
                        rings: bundle.rings,
                        real_keys: bundle.real_keys,
                    },
                ))
            }
            ActionKind::Privacy2Public => {
                if req.to.is_empty() {
                    return Err(WalletError::InvalidParams("public receiver is empty"));
                }
                let params = SpendParams {
                    token: &req.token,
                    sender: &req.from,
                    amount: req.amount,
                    note: &req.note,
                    mix: req.mix,
                    expire_secs: req.expire_secs,
                };
                let (tx, bundle, header) = core.assemble_p2pub(&params, &req.to)?;
                let tx_hash = tx.hash()?;
                core.freeze_selected(
                    &req.token,
                    &req.from,
                    &tx,
                    tx_hash,
                    bundle.selected,
                    &header,
                    core.effective_expire(req.expire_secs),
                )?;
                Ok((
                    tx,
                    SigningContext {
                        kind: ActionKind::Privacy2Public,
                        rings: bundle.rings,
                        real_keys: bundle.real_keys,
                    },
                ))
            }
        }
    }

    /// Finalize a deferred build. The context's flavor must match the
    /// transaction payload; public flavors additionally need the
    /// conventional signer.
    pub fn sign_transaction(
        &self,
        tx: &Tx,
        ctx: &SigningContext,
        signer: Option<&dyn TxSigner>,
    ) -> Result<Tx, WalletError> {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        core.check_status()?;

        let action = tx.action()?;
        if action.kind() != ctx.kind {
            return Err(WalletError::InvalidParams(
                "signing context does not match the transaction",
            ));
        }

        let mut signed = tx.clone();
        match action.kind() {
            ActionKind::Public2Privacy => {
                let signer = signer.ok_or(WalletError::InvalidParams(
                    "public transaction needs a conventional signer",
                ))?;
                sign_tx_plain(signer, &mut signed)?;
            }
            ActionKind::Privacy2Privacy | ActionKind::Privacy2Public => {
                let input = action
                    .input()
                    .ok_or(WalletError::InvalidParams("transaction has no inputs"))?;
                core.ring_sign(&mut signed, input, &ctx.rings, &ctx.real_keys)?;
            }
        }
        Ok(signed)
    }

    // ----- queries -----

    /// Available and frozen UTXO listings for `(token, addr)`.
    pub fn privacy_account_info(
        &self,
        token: &str,
        addr: &str,
    ) -> Result<PrivacyAccountInfo, WalletError> {
        let core = self.lock_core();
        check_token_and_addr(token, addr)?;
        let available = core
            .store
            .list_available(token, addr)?
            .iter()
            .map(OwnedUtxo::to_utxo)
            .collect();
        let mut frozen = Vec::new();
        for record in core.store.list_frozen(token, addr)? {
            frozen.extend(record.utxos.iter().map(OwnedUtxo::to_utxo));
        }
        Ok(PrivacyAccountInfo { available, frozen })
    }

    /// `(available, frozen)` balance sums.
    pub fn privacy_balance(&self, token: &str, addr: &str) -> Result<(u64, u64), WalletError> {
        let info = self.privacy_account_info(token, addr)?;
        let available = info.available.iter().map(|u| u.amount).sum();
        let frozen = info.frozen.iter().map(|u| u.amount).sum();
        Ok((available, frozen))
    }

    /// Spent-output records for `(token, addr)`.
    pub fn spent_utxos(&self, token: &str, addr: &str) -> Result<Vec<SpentTx>, WalletError> {
        self.ensure_not_rescanning()?;
        let core = self.lock_core();
        check_token_and_addr(token, addr)?;
        Ok(core.store.list_spent(token, addr)?)
    }

    // ----- chain events -----

    /// A block confirmed: discover own outputs, buffer observed spends,
    /// reconcile. One atomic batch per block; never raises.
    pub fn process_block_added(&self, block: &BlockDetail) {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        let accounts = match core.scan_accounts(&[]) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "cannot load scan accounts");
                return;
            }
        };
        let mut txn = match core.store.rw_txn() {
            Ok(txn) => txn,
            Err(e) => {
                warn!(error = %e, "cannot open store batch for block");
                return;
            }
        };
        for detail in &block.txs {
            observer::process_confirmed_tx(&core.store, core.crypto.as_ref(), &accounts, detail, &mut txn);
        }
        loop {
            match observer::reconcile_scan_candidates(&core.store, &mut txn, core.config.scan_flush_page) {
                Ok(n) if n >= core.config.scan_flush_page => continue,
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "spend reconciliation failed");
                    break;
                }
            }
        }
        if let Err(e) = txn.commit() {
            warn!(error = %e, "block batch commit failed");
        }
    }

    /// A block reverted: roll back own outputs, suspend confirmed
    /// spends. One atomic batch per block; never raises.
    pub fn process_block_reverted(&self, block: &BlockDetail) {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        let accounts = match core.scan_accounts(&[]) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "cannot load scan accounts");
                return;
            }
        };
        let mut txn = match core.store.rw_txn() {
            Ok(txn) => txn,
            Err(e) => {
                warn!(error = %e, "cannot open store batch for revert");
                return;
            }
        };
        let expire = core.config.default_expire_secs;
        let interval = core.config.block_interval_secs;
        for detail in &block.txs {
            observer::process_reverted_tx(
                &core.store,
                core.crypto.as_ref(),
                &accounts,
                detail,
                &block.header,
                expire,
                interval,
                &mut txn,
            );
        }
        if let Err(e) = txn.commit() {
            warn!(error = %e, "revert batch commit failed");
        }
    }

    /// Expiry tick: restore frozen spends whose transaction the chain
    /// no longer knows. Never raises.
    pub fn on_timer(&self) {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        let header = match core.chain.last_header() {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "expiry tick: no chain header");
                return;
            }
        };
        let mut txn = match core.store.rw_txn() {
            Ok(txn) => txn,
            Err(e) => {
                warn!(error = %e, "cannot open store batch for expiry");
                return;
            }
        };
        observer::expire_frozen(&core.store, core.chain.as_ref(), &header, &mut txn);
        if let Err(e) = txn.commit() {
            warn!(error = %e, "expiry batch commit failed");
        }
    }

    // ----- rescan -----

    /// Replay all historical privacy transactions, page by page, and
    /// rebuild the UTXO set for `addrs` (every enabled address when
    /// empty). Builds fail with `RescanInProgress` while this runs.
    /// `shutdown` is polled between pages.
    pub fn rescan_utxos(
        &self,
        addrs: &[String],
        shutdown: &Receiver<()>,
    ) -> Result<(), WalletError> {
        let (target_addrs, page_size, activation, flush_page) = {
            let core = self.lock_core();
            core.check_status()?;
            let target: Vec<String> = if addrs.is_empty() {
                core.store
                    .list_accounts()?
                    .into_iter()
                    .map(|(addr, _)| addr)
                    .collect()
            } else {
                addrs.to_vec()
            };
            (
                target,
                core.config.rescan_page_size,
                core.config.privacy_activation_height,
                core.config.scan_flush_page,
            )
        };
        if target_addrs.is_empty() {
            return Err(WalletError::InvalidParams("no privacy-enabled addresses"));
        }

        self.rescanning.store(true, Ordering::SeqCst);
        let result =
            self.rescan_inner(&target_addrs, page_size, activation, flush_page, shutdown);
        self.rescanning.store(false, Ordering::SeqCst);
        result
    }

    fn rescan_inner(
        &self,
        target_addrs: &[String],
        page_size: i32,
        activation: i64,
        flush_page: usize,
        shutdown: &Receiver<()>,
    ) -> Result<(), WalletError> {
        {
            let core = self.lock_core();
            for addr in target_addrs {
                core.store.set_rescan_flag(addr, RescanFlag::Scanning)?;
            }
        }
        info!(addrs = target_addrs.len(), "utxo rescan started");

        let contract_addr = exec_address(PRIVACY_CONTRACT);
        let mut height = -1i64;
        let mut index = 0i64;
        loop {
            if shutdown.try_recv().is_ok() {
                // Shutting down; the flag stays `scanning` on disk and
                // the next start resumes from scratch.
                return Ok(());
            }

            let page = {
                let core = self.lock_core();
                core.chain.get_privacy_txs_by_addr(&TxListRequest {
                    addr: contract_addr.clone(),
                    flag: 0,
                    direction: 0,
                    count: page_size,
                    height,
                    index,
                })
            };
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "rescan listing failed; finishing early");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let hashes: Vec<TxHash> = page.iter().map(|s| s.tx_hash).collect();
            let last = &page[page.len() - 1];
            height = last.height;
            index = last.index;

            let details = {
                let core = self.lock_core();
                core.chain.get_transactions_by_hash(&hashes)
            };
            let details = match details {
                Ok(details) => details,
                Err(e) => {
                    warn!(error = %e, "rescan detail fetch failed; finishing early");
                    break;
                }
            };

            {
                let mut guard = self.lock_core();
                let core = &mut *guard;
                let accounts = core.scan_accounts(target_addrs)?;
                let mut txn = core.store.rw_txn()?;
                for detail in &details {
                    observer::process_confirmed_tx(
                        &core.store,
                        core.crypto.as_ref(),
                        &accounts,
                        detail,
                        &mut txn,
                    );
                }
                txn.commit().map_err(StoreError::from)?;
            }

            if (page.len() as i32) < page_size {
                break;
            }
            // Privacy is inactive below the fork; nothing older matters.
            if height < activation {
                break;
            }
        }

        // Head reached: settle observed spends, then flip the flags.
        {
            let mut guard = self.lock_core();
            let core = &mut *guard;
            loop {
                let mut txn = core.store.rw_txn()?;
                let drained = observer::reconcile_scan_candidates(&core.store, &mut txn, flush_page)?;
                txn.commit().map_err(StoreError::from)?;
                if drained < flush_page {
                    break;
                }
            }
            for addr in target_addrs {
                core.store.set_rescan_flag(addr, RescanFlag::ScanEnd)?;
            }
        }
        info!("utxo rescan finished");
        Ok(())
    }

    /// Rescan progress marker of one address.
    pub fn rescan_flag(&self, addr: &str) -> Result<RescanFlag, WalletError> {
        Ok(self.lock_core().store.get_rescan_flag(addr)?)
    }

    /// Test hook: force the in-memory rescan gate.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn force_rescan_state(&self, scanning: bool) {
        self.rescanning.store(scanning, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{new_test_wallet, MockSigner};
    use crate::types::COIN;

    fn p2s_request(amount: u64) -> PublicToPrivacyRequest {
        PublicToPrivacyRequest {
            token: "VEIL".to_string(),
            sender: "alice-public".to_string(),
            recipient_pair: String::new(),
            amount,
            note: String::new(),
            expire_secs: 0,
        }
    }

    #[test]
    fn amounts_off_the_coin_grid_are_rejected() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let pair = wallet.enable_privacy("alice", &[1u8; 32]).unwrap();

        for bad in [0u64, 1, COIN - 1, COIN + 1] {
            let mut req = p2s_request(bad);
            req.recipient_pair = pair.clone();
            match wallet.send_public_to_private(&MockSigner, &req) {
                Err(WalletError::InvalidAmount(a)) => assert_eq!(a, bad),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_token_is_rejected() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let pair = wallet.enable_privacy("alice", &[1u8; 32]).unwrap();
        let mut req = p2s_request(COIN);
        req.token = String::new();
        req.recipient_pair = pair;
        match wallet.send_public_to_private(&MockSigner, &req) {
            Err(WalletError::InvalidParams(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_recipient_pair_is_rejected() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let mut req = p2s_request(COIN);
        req.recipient_pair = "00ff".to_string();
        match wallet.send_public_to_private(&MockSigner, &req) {
            Err(WalletError::InvalidPubKeyLen(2)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn locked_wallet_refuses_builds() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let pair = wallet.enable_privacy("alice", &[1u8; 32]).unwrap();
        wallet.lock();
        let mut req = p2s_request(COIN);
        req.recipient_pair = pair;
        match wallet.send_public_to_private(&MockSigner, &req) {
            Err(WalletError::WalletLocked) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(wallet.unlock("wrong").is_err());
        wallet.unlock("s3cret").unwrap();
        assert!(wallet.send_public_to_private(&MockSigner, &req).is_ok());
    }

    #[test]
    fn rescan_gate_blocks_builds() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let pair = wallet.enable_privacy("alice", &[1u8; 32]).unwrap();
        wallet.force_rescan_state(true);
        let mut req = p2s_request(COIN);
        req.recipient_pair = pair;
        match wallet.send_public_to_private(&MockSigner, &req) {
            Err(WalletError::RescanInProgress) => {}
            other => panic!("unexpected: {other:?}"),
        }
        wallet.force_rescan_state(false);
        assert!(wallet.send_public_to_private(&MockSigner, &req).is_ok());
    }

    #[test]
    fn enable_privacy_is_idempotent() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        let first = wallet.enable_privacy("alice", &[1u8; 32]).unwrap();
        let second = wallet.enable_privacy("alice", &[9u8; 32]).unwrap();
        assert_eq!(first, second);
        assert_eq!(wallet.public_key_pair("alice").unwrap(), first);
    }

    #[test]
    fn unknown_address_has_no_pair() {
        let (_dir, wallet, _chain) = new_test_wallet("s3cret");
        match wallet.public_key_pair("nobody") {
            Err(WalletError::InvalidParams(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
