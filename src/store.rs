//! LMDB-backed wallet store.
//!
//! One named database per keyspace, mirroring the on-disk layout:
//! an authoritative record per discovered output keyed by its global
//! index, an available-index per `(token, owner)`, frozen / spent /
//! revert-frozen buckets keyed by `(token, owner, tx_hash)`, the
//! observed-spend buffer, per-address rescan flags and the encrypted
//! account key records.
//!
//! All mutations go through an [`lmdb::RwTransaction`] supplied by the
//! caller, so every event (a build, a block, a timer tick) commits as one
//! atomic batch.

use lmdb::{Cursor, Database, DatabaseFlags, Environment, RoTransaction, RwTransaction, Transaction, WriteFlags};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{
    chain::ChainHeader,
    error::StoreError,
    keys::EncryptedPrivacyKeys,
    types::{PublicKey, TxHash, Utxo, UtxoBasic, UtxoGlobalIndex},
};

// LMDB database names.
const UTXO_RECORD_DB_NAME: &str = "privacy-utxo-record";
const AVAILABLE_DB_NAME: &str = "privacy-utxo";
const FTXO_DB_NAME: &str = "privacy-ftxo";
const STXO_DB_NAME: &str = "privacy-stxo";
const REVERT_FTXO_DB_NAME: &str = "privacy-revert-ftxo";
const SCAN_INPUT_DB_NAME: &str = "privacy-scan-input";
const RESCAN_FLAG_DB_NAME: &str = "privacy-rescan-flag";
const ACCOUNT_DB_NAME: &str = "account";

/// Map size for the wallet environment. Wallet data is tiny; this is
/// address space, not resident memory.
const MAP_SIZE: usize = 1 << 28;

/// Authoritative record of one output owned by this wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedUtxo {
    /// Transaction that created the output.
    pub tx_hash: TxHash,
    pub out_index: u32,
    pub token: String,
    pub owner: String,
    pub amount: u64,
    /// Ephemeral tx public key the one-time address was derived from.
    pub r_tx_pub: PublicKey,
    pub one_time_pub_key: PublicKey,
    pub height: i64,
    pub tx_index: u32,
}

impl OwnedUtxo {
    pub fn global_index(&self) -> UtxoGlobalIndex {
        UtxoGlobalIndex {
            tx_hash: self.tx_hash,
            out_index: self.out_index,
        }
    }

    pub fn to_basic(&self) -> UtxoBasic {
        UtxoBasic {
            global_index: self.global_index(),
            one_time_pub_key: self.one_time_pub_key,
        }
    }

    pub fn to_utxo(&self) -> Utxo {
        Utxo {
            amount: self.amount,
            basic: self.to_basic(),
        }
    }
}

/// A frozen spend: the in-flight transaction plus the outputs it
/// reserves. The serialized transaction rides along so the record is
/// self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenTx {
    pub token: String,
    pub owner: String,
    /// Hash of the spending transaction.
    pub tx_hash: TxHash,
    pub tx_bytes: Vec<u8>,
    pub utxos: Vec<OwnedUtxo>,
    pub freeze_height: i64,
    pub freeze_time: i64,
    pub expire_height: i64,
    pub expire_time: i64,
}

impl FrozenTx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: String,
        owner: String,
        tx_hash: TxHash,
        tx_bytes: Vec<u8>,
        utxos: Vec<OwnedUtxo>,
        header: &ChainHeader,
        expire_secs: u64,
        block_interval_secs: u64,
    ) -> Self {
        let expire_blocks = (expire_secs / block_interval_secs.max(1)).max(1) as i64;
        Self {
            token,
            owner,
            tx_hash,
            tx_bytes,
            utxos,
            freeze_height: header.height,
            freeze_time: header.block_time,
            expire_height: header.height + expire_blocks,
            expire_time: header.block_time + expire_secs as i64,
        }
    }

    /// Both the clock and the height must have passed the horizon.
    pub fn is_expired(&self, height: i64, block_time: i64) -> bool {
        block_time >= self.expire_time && height >= self.expire_height
    }

    pub fn total_amount(&self) -> u64 {
        self.utxos.iter().map(|u| u.amount).sum()
    }
}

/// Outputs consumed by a confirmed spending transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentTx {
    pub token: String,
    pub owner: String,
    /// Hash of the spending transaction.
    pub tx_hash: TxHash,
    pub tx_bytes: Vec<u8>,
    pub utxos: Vec<OwnedUtxo>,
}

/// A ring member seen in a confirmed input, buffered until ownership is
/// reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub global_index: UtxoGlobalIndex,
    pub spending_tx_hash: TxHash,
}

/// Per-address rescan progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RescanFlag {
    NoScan,
    Scanning,
    ScanEnd,
}

fn record_key(idx: &UtxoGlobalIndex) -> String {
    format!("{}:{}", idx.tx_hash, idx.out_index)
}

fn available_key(token: &str, owner: &str, idx: &UtxoGlobalIndex) -> String {
    format!("{}:{}:{}:{}", token, owner, idx.tx_hash, idx.out_index)
}

fn available_prefix(token: &str, owner: &str) -> String {
    format!("{}:{}:", token, owner)
}

fn frozen_key(token: &str, owner: &str, tx_hash: &TxHash) -> String {
    format!("{}:{}:{}", token, owner, tx_hash)
}

fn frozen_prefix(token: &str, owner: &str) -> String {
    format!("{}:{}:", token, owner)
}

/// Handle over the wallet's LMDB environment.
pub struct WalletStore {
    env: Environment,
    utxo_records: Database,
    available: Database,
    ftxo: Database,
    stxo: Database,
    revert_ftxo: Database,
    scan_input: Database,
    rescan_flag: Database,
    accounts: Database,
}

impl WalletStore {
    /// Open (creating if necessary) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(path)
            .map_err(|e| StoreError::Serialization(format!("create store dir: {e}")))?;
        let env = Environment::new()
            .set_max_dbs(16)
            .set_map_size(MAP_SIZE)
            .open(path)?;
        let utxo_records = env.create_db(Some(UTXO_RECORD_DB_NAME), DatabaseFlags::empty())?;
        let available = env.create_db(Some(AVAILABLE_DB_NAME), DatabaseFlags::empty())?;
        let ftxo = env.create_db(Some(FTXO_DB_NAME), DatabaseFlags::empty())?;
        let stxo = env.create_db(Some(STXO_DB_NAME), DatabaseFlags::empty())?;
        let revert_ftxo = env.create_db(Some(REVERT_FTXO_DB_NAME), DatabaseFlags::empty())?;
        let scan_input = env.create_db(Some(SCAN_INPUT_DB_NAME), DatabaseFlags::empty())?;
        let rescan_flag = env.create_db(Some(RESCAN_FLAG_DB_NAME), DatabaseFlags::empty())?;
        let accounts = env.create_db(Some(ACCOUNT_DB_NAME), DatabaseFlags::empty())?;
        Ok(Self {
            env,
            utxo_records,
            available,
            ftxo,
            stxo,
            revert_ftxo,
            scan_input,
            rescan_flag,
            accounts,
        })
    }

    /// Begin a write batch. The caller commits once per event.
    pub fn rw_txn(&self) -> Result<RwTransaction<'_>, StoreError> {
        Ok(self.env.begin_rw_txn()?)
    }

    pub fn ro_txn(&self) -> Result<RoTransaction<'_>, StoreError> {
        Ok(self.env.begin_ro_txn()?)
    }

    fn get_value<T: DeserializeOwned>(
        txn: &impl Transaction,
        db: Database,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match txn.get(db, &key.as_bytes()) {
            Ok(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(StoreError::Lmdb(e)),
        }
    }

    fn put_value<T: Serialize>(
        txn: &mut RwTransaction<'_>,
        db: Database,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        txn.put(db, &key.as_bytes(), &bytes, WriteFlags::empty())?;
        Ok(())
    }

    fn del_value(
        txn: &mut RwTransaction<'_>,
        db: Database,
        key: &str,
    ) -> Result<bool, StoreError> {
        match txn.del(db, &key.as_bytes(), None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(StoreError::Lmdb(e)),
        }
    }

    fn prefix_entries(
        txn: &impl Transaction,
        db: Database,
        prefix: &str,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        let mut cursor = txn.open_ro_cursor(db)?;
        for item in cursor.iter_from(prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    // ----- account key records -----

    pub fn put_account(&self, addr: &str, record: &EncryptedPrivacyKeys) -> Result<(), StoreError> {
        let mut txn = self.rw_txn()?;
        Self::put_value(&mut txn, self.accounts, addr, record)?;
        txn.commit()?;
        Ok(())
    }

    pub fn get_account(&self, addr: &str) -> Result<Option<EncryptedPrivacyKeys>, StoreError> {
        let txn = self.ro_txn()?;
        Self::get_value(&txn, self.accounts, addr)
    }

    /// All privacy-enabled addresses with their sealed key records.
    pub fn list_accounts(&self) -> Result<Vec<(String, EncryptedPrivacyKeys)>, StoreError> {
        let txn = self.ro_txn()?;
        let mut out = Vec::new();
        let mut cursor = txn.open_ro_cursor(self.accounts)?;
        for item in cursor.iter_start() {
            let (key, value) = item?;
            let addr = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Serialization("account key is not utf-8".to_string()))?;
            out.push((addr, bincode::deserialize(value)?));
        }
        Ok(out)
    }

    // ----- output records and the available index -----

    /// Persist a newly discovered output. Idempotent per global index:
    /// returns `false` without touching anything when the record already
    /// exists.
    pub fn set_utxo(
        &self,
        txn: &mut RwTransaction<'_>,
        record: &OwnedUtxo,
    ) -> Result<bool, StoreError> {
        let idx = record.global_index();
        let key = record_key(&idx);
        let existing: Option<OwnedUtxo> = Self::get_value(&*txn, self.utxo_records, &key)?;
        if existing.is_some() {
            return Ok(false);
        }
        Self::put_value(txn, self.utxo_records, &key, record)?;
        Self::put_value(
            txn,
            self.available,
            &available_key(&record.token, &record.owner, &idx),
            &key,
        )?;
        Ok(true)
    }

    pub fn is_utxo_exists(
        &self,
        txn: &impl Transaction,
        idx: &UtxoGlobalIndex,
    ) -> Result<bool, StoreError> {
        let record: Option<OwnedUtxo> = Self::get_value(txn, self.utxo_records, &record_key(idx))?;
        Ok(record.is_some())
    }

    pub fn get_utxo(
        &self,
        txn: &impl Transaction,
        idx: &UtxoGlobalIndex,
    ) -> Result<Option<OwnedUtxo>, StoreError> {
        Self::get_value(txn, self.utxo_records, &record_key(idx))
    }

    /// Drop a record and its availability row; used when the creating
    /// transaction is reverted.
    pub fn delete_own_utxo(
        &self,
        txn: &mut RwTransaction<'_>,
        idx: &UtxoGlobalIndex,
    ) -> Result<bool, StoreError> {
        let key = record_key(idx);
        let record: Option<OwnedUtxo> = Self::get_value(&*txn, self.utxo_records, &key)?;
        let Some(record) = record else {
            return Ok(false);
        };
        Self::del_value(txn, self.utxo_records, &key)?;
        Self::del_value(
            txn,
            self.available,
            &available_key(&record.token, &record.owner, idx),
        )?;
        Ok(true)
    }

    pub fn list_available_in(
        &self,
        txn: &impl Transaction,
        token: &str,
        owner: &str,
    ) -> Result<Vec<OwnedUtxo>, StoreError> {
        let entries = Self::prefix_entries(txn, self.available, &available_prefix(token, owner))?;
        let mut out = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let record_key: String = bincode::deserialize(&value)?;
            let record: Option<OwnedUtxo> = Self::get_value(txn, self.utxo_records, &record_key)?;
            if let Some(record) = record {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn list_available(&self, token: &str, owner: &str) -> Result<Vec<OwnedUtxo>, StoreError> {
        let txn = self.ro_txn()?;
        self.list_available_in(&txn, token, owner)
    }

    // ----- frozen / spent buckets -----

    fn frozen_db(&self, revert: bool) -> Database {
        if revert {
            self.revert_ftxo
        } else {
            self.ftxo
        }
    }

    /// Freeze the outputs a pending transaction spends. Idempotent per
    /// `(token, owner, tx_hash)`: a second call is a no-op.
    pub fn move_utxo_to_ftxo(
        &self,
        txn: &mut RwTransaction<'_>,
        frozen: &FrozenTx,
    ) -> Result<bool, StoreError> {
        let key = frozen_key(&frozen.token, &frozen.owner, &frozen.tx_hash);
        let existing: Option<FrozenTx> = Self::get_value(&*txn, self.ftxo, &key)?;
        if existing.is_some() {
            return Ok(false);
        }
        for utxo in &frozen.utxos {
            Self::del_value(
                txn,
                self.available,
                &available_key(&frozen.token, &frozen.owner, &utxo.global_index()),
            )?;
        }
        Self::put_value(txn, self.ftxo, &key, frozen)?;
        Ok(true)
    }

    /// Thaw a frozen spend back into available outputs. The move only
    /// happens when `predicate(tx_hash)` returns true; the timer passes
    /// "the chain does not know this transaction".
    pub fn move_ftxo_to_utxo(
        &self,
        txn: &mut RwTransaction<'_>,
        revert: bool,
        token: &str,
        owner: &str,
        tx_hash: &TxHash,
        predicate: impl FnOnce(&TxHash) -> bool,
    ) -> Result<bool, StoreError> {
        let db = self.frozen_db(revert);
        let key = frozen_key(token, owner, tx_hash);
        let frozen: Option<FrozenTx> = Self::get_value(&*txn, db, &key)?;
        let Some(frozen) = frozen else {
            return Ok(false);
        };
        if !predicate(tx_hash) {
            return Ok(false);
        }
        for utxo in &frozen.utxos {
            let idx = utxo.global_index();
            let rkey = record_key(&idx);
            Self::put_value(txn, self.utxo_records, &rkey, utxo)?;
            Self::put_value(txn, self.available, &available_key(token, owner, &idx), &rkey)?;
        }
        Self::del_value(txn, db, &key)?;
        Ok(true)
    }

    /// Promote a frozen spend to spent once its transaction confirmed.
    pub fn move_ftxo_to_stxo(
        &self,
        txn: &mut RwTransaction<'_>,
        revert: bool,
        token: &str,
        owner: &str,
        tx_hash: &TxHash,
    ) -> Result<bool, StoreError> {
        let db = self.frozen_db(revert);
        let key = frozen_key(token, owner, tx_hash);
        let frozen: Option<FrozenTx> = Self::get_value(&*txn, db, &key)?;
        let Some(frozen) = frozen else {
            return Ok(false);
        };
        let spent = SpentTx {
            token: frozen.token,
            owner: frozen.owner,
            tx_hash: frozen.tx_hash,
            tx_bytes: frozen.tx_bytes,
            utxos: frozen.utxos,
        };
        Self::put_value(txn, self.stxo, &key, &spent)?;
        Self::del_value(txn, db, &key)?;
        Ok(true)
    }

    /// Record a confirmed spend of outputs that were never frozen here
    /// (discovered via scan). Their availability rows vanish.
    pub fn move_utxo_to_stxo(
        &self,
        txn: &mut RwTransaction<'_>,
        spent: &SpentTx,
    ) -> Result<(), StoreError> {
        for utxo in &spent.utxos {
            Self::del_value(
                txn,
                self.available,
                &available_key(&spent.token, &spent.owner, &utxo.global_index()),
            )?;
        }
        Self::put_value(
            txn,
            self.stxo,
            &frozen_key(&spent.token, &spent.owner, &spent.tx_hash),
            spent,
        )?;
        Ok(())
    }

    /// A reorg dropped the spending transaction: suspend the spent
    /// bucket entry until the transaction is re-mined or expires.
    pub fn move_stxo_to_revert_ftxo(
        &self,
        txn: &mut RwTransaction<'_>,
        token: &str,
        owner: &str,
        tx_hash: &TxHash,
        header: &ChainHeader,
        expire_secs: u64,
        block_interval_secs: u64,
    ) -> Result<bool, StoreError> {
        let key = frozen_key(token, owner, tx_hash);
        let spent: Option<SpentTx> = Self::get_value(&*txn, self.stxo, &key)?;
        let Some(spent) = spent else {
            return Ok(false);
        };
        let frozen = FrozenTx::new(
            spent.token,
            spent.owner,
            spent.tx_hash,
            spent.tx_bytes,
            spent.utxos,
            header,
            expire_secs,
            block_interval_secs,
        );
        Self::put_value(txn, self.revert_ftxo, &key, &frozen)?;
        Self::del_value(txn, self.stxo, &key)?;
        Ok(true)
    }

    pub fn get_frozen(
        &self,
        txn: &impl Transaction,
        revert: bool,
        token: &str,
        owner: &str,
        tx_hash: &TxHash,
    ) -> Result<Option<FrozenTx>, StoreError> {
        Self::get_value(txn, self.frozen_db(revert), &frozen_key(token, owner, tx_hash))
    }

    pub fn list_frozen_in(
        &self,
        txn: &impl Transaction,
        revert: bool,
        token: &str,
        owner: &str,
    ) -> Result<Vec<FrozenTx>, StoreError> {
        let entries =
            Self::prefix_entries(txn, self.frozen_db(revert), &frozen_prefix(token, owner))?;
        entries
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(StoreError::from))
            .collect()
    }

    pub fn list_frozen(&self, token: &str, owner: &str) -> Result<Vec<FrozenTx>, StoreError> {
        let txn = self.ro_txn()?;
        self.list_frozen_in(&txn, false, token, owner)
    }

    /// Every frozen entry across all owners; the expiry timer walks this.
    pub fn list_all_frozen(
        &self,
        txn: &impl Transaction,
        revert: bool,
    ) -> Result<Vec<FrozenTx>, StoreError> {
        let mut out = Vec::new();
        let mut cursor = txn.open_ro_cursor(self.frozen_db(revert))?;
        for item in cursor.iter_start() {
            let (_, value) = item?;
            out.push(bincode::deserialize(value)?);
        }
        Ok(out)
    }

    pub fn list_spent(&self, token: &str, owner: &str) -> Result<Vec<SpentTx>, StoreError> {
        let txn = self.ro_txn()?;
        let entries = Self::prefix_entries(&txn, self.stxo, &frozen_prefix(token, owner))?;
        entries
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(StoreError::from))
            .collect()
    }

    pub fn get_spent(
        &self,
        txn: &impl Transaction,
        token: &str,
        owner: &str,
        tx_hash: &TxHash,
    ) -> Result<Option<SpentTx>, StoreError> {
        Self::get_value(txn, self.stxo, &frozen_key(token, owner, tx_hash))
    }

    // ----- observed-spend buffer -----

    /// Buffer ring members seen in confirmed inputs, keyed by the
    /// output's global index; the spending hash rides in the value so
    /// reconciliation knows which frozen bucket to promote.
    pub fn store_scan_candidates(
        &self,
        txn: &mut RwTransaction<'_>,
        spending_tx_hash: &TxHash,
        indexes: &[UtxoGlobalIndex],
    ) -> Result<(), StoreError> {
        for idx in indexes {
            let candidate = ScanCandidate {
                global_index: *idx,
                spending_tx_hash: *spending_tx_hash,
            };
            Self::put_value(txn, self.scan_input, &record_key(idx), &candidate)?;
        }
        Ok(())
    }

    pub fn list_scan_candidates(
        &self,
        txn: &impl Transaction,
        limit: usize,
    ) -> Result<Vec<ScanCandidate>, StoreError> {
        let mut out = Vec::new();
        let mut cursor = txn.open_ro_cursor(self.scan_input)?;
        for item in cursor.iter_start() {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            out.push(bincode::deserialize(value)?);
        }
        Ok(out)
    }

    pub fn delete_scan_candidate(
        &self,
        txn: &mut RwTransaction<'_>,
        idx: &UtxoGlobalIndex,
    ) -> Result<(), StoreError> {
        Self::del_value(txn, self.scan_input, &record_key(idx))?;
        Ok(())
    }

    /// Drop buffered candidates of a reverted spending transaction.
    pub fn remove_scan_candidates_for(
        &self,
        txn: &mut RwTransaction<'_>,
        spending_tx_hash: &TxHash,
    ) -> Result<usize, StoreError> {
        let keys: Vec<Vec<u8>> = {
            let mut keys = Vec::new();
            let mut cursor = txn.open_ro_cursor(self.scan_input)?;
            for item in cursor.iter_start() {
                let (key, value) = item?;
                let candidate: ScanCandidate = bincode::deserialize(value)?;
                if candidate.spending_tx_hash == *spending_tx_hash {
                    keys.push(key.to_vec());
                }
            }
            keys
        };
        for key in &keys {
            match txn.del(self.scan_input, key, None) {
                Ok(()) | Err(lmdb::Error::NotFound) => {}
                Err(e) => return Err(StoreError::Lmdb(e)),
            }
        }
        Ok(keys.len())
    }

    // ----- rescan flags -----

    pub fn set_rescan_flag(&self, addr: &str, flag: RescanFlag) -> Result<(), StoreError> {
        let mut txn = self.rw_txn()?;
        Self::put_value(&mut txn, self.rescan_flag, addr, &flag)?;
        txn.commit()?;
        Ok(())
    }

    pub fn get_rescan_flag(&self, addr: &str) -> Result<RescanFlag, StoreError> {
        let txn = self.ro_txn()?;
        Ok(Self::get_value(&txn, self.rescan_flag, addr)?.unwrap_or(RescanFlag::NoScan))
    }
}
