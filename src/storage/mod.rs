use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::blockchain::Block;
use crate::error::StoreError;
use crate::transaction::{Amount, Transaction};

/// Everything needed to resume a ledger: chain, pending transactions,
/// derived balances and issued supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    #[serde(default)]
    pub mempool: Vec<Transaction>,
    #[serde(default)]
    pub balances: BTreeMap<String, Amount>,
    #[serde(default)]
    pub current_supply: Amount,
    #[serde(default)]
    pub difficulty: u32,
}

/// JSON document on disk holding a [`LedgerSnapshot`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically: temp file first, then rename.
    pub fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            "STORE - saved {} blocks to {}",
            snapshot.chain.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the snapshot; `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        if !self.path.exists() {
            info!("STORE - no state at {}, starting fresh", self.path.display());
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            "STORE - loaded {} blocks from {}",
            snapshot.chain.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Blockchain, ChainParams};

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn snapshot_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));

        let mut bc = Blockchain::new(ChainParams::with_difficulty(1));
        let genesis = bc.params().genesis_address.clone();
        bc.submit_transaction(Transaction::new(
            genesis.clone(),
            "GSC1dddddddddddddddddddddddddddddddd",
            Amount::from_coins(4),
            Amount::ZERO,
        ))
        .unwrap();
        bc.mine_next("GSC1eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee", None, false)
            .unwrap();
        bc.submit_transaction(Transaction::new(
            genesis,
            "GSC1ffffffffffffffffffffffffffffffff",
            Amount::from_coins(1),
            Amount::ZERO,
        ))
        .unwrap();

        store.save(&bc.snapshot()).unwrap();
        let loaded = store.load().unwrap().expect("state present");
        assert_eq!(loaded.chain, bc.chain());
        assert_eq!(loaded.mempool, bc.mempool());
        assert_eq!(&loaded.balances, bc.balances());
        assert_eq!(loaded.current_supply, bc.current_supply());

        let mut fresh = Blockchain::new(ChainParams::with_difficulty(1));
        assert!(fresh.restore(loaded));
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh.mempool().len(), 1);
        assert!(fresh.is_chain_valid());
    }

    #[test]
    fn genesis_only_state_keeps_fresh_chain() {
        let bc = Blockchain::new(ChainParams::with_difficulty(1));
        let mut snapshot = bc.snapshot();
        snapshot.chain[0].hash = "tampered".into();

        let mut fresh = Blockchain::new(ChainParams::with_difficulty(1));
        assert!(!fresh.restore(snapshot));
        assert_ne!(fresh.last_block().hash, "tampered");
    }

    #[test]
    fn tampered_state_loads_but_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut bc = Blockchain::new(ChainParams::with_difficulty(1));
        bc.mine_next("GSC1eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee", None, true)
            .unwrap();
        let mut snapshot = bc.snapshot();
        snapshot.chain[1].transactions[0].receiver = "thief".into();
        store.save(&snapshot).unwrap();

        let mut fresh = Blockchain::new(ChainParams::with_difficulty(1));
        assert!(fresh.restore(store.load().unwrap().unwrap()));
        assert!(!fresh.is_chain_valid());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            StateStore::new(path).load(),
            Err(StoreError::Json(_))
        ));
    }
}
