use log::{debug, error, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::block::MiningProgress;
use super::{Block, Blockchain, ChainParams, TxLocation};
use crate::error::RejectReason;
use crate::storage::{LedgerSnapshot, StateStore};
use crate::transaction::{Amount, Transaction, is_valid_address};

/// Read-only summary of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub height: u64,
    pub blocks: usize,
    pub latest_hash: String,
    pub mempool_size: usize,
    pub total_supply: Amount,
    pub current_supply: Amount,
    pub difficulty: u32,
    pub current_reward: Amount,
    pub is_valid: bool,
    pub is_mining: bool,
}

/// Shared handle over a [`Blockchain`].
///
/// Chain, mempool and balances sit behind one mutex. At most one
/// [`Ledger::mine_next`] runs at a time, and the nonce search happens with
/// the mutex released so submissions and reads stay responsive.
#[derive(Debug)]
pub struct Ledger {
    state: Mutex<Blockchain>,
    mining: AtomicBool,
    store: Option<StateStore>,
}

/// Clears the in-flight flag however mining ends.
struct MiningGuard<'a>(&'a AtomicBool);

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Ledger {
    /// Memory-only ledger starting from genesis.
    pub fn new(params: ChainParams) -> Self {
        Self {
            state: Mutex::new(Blockchain::new(params)),
            mining: AtomicBool::new(false),
            store: None,
        }
    }

    /// Ledger backed by `store`: resumes from it when it holds more than
    /// genesis, and saves after every mined block. Load failures fall back
    /// to a fresh genesis chain.
    pub fn with_store(params: ChainParams, store: StateStore) -> Self {
        let mut bc = Blockchain::new(params);
        match store.load() {
            Ok(Some(snapshot)) => {
                if bc.restore(snapshot) && !bc.is_chain_valid() {
                    warn!(
                        "LEDGER - state loaded from {} does not validate",
                        store.path().display()
                    );
                }
            }
            Ok(None) => {}
            Err(e) => error!(
                "LEDGER - failed to load {}: {e}; starting from genesis",
                store.path().display()
            ),
        }
        Self {
            state: Mutex::new(bc),
            mining: AtomicBool::new(false),
            store: Some(store),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Blockchain> {
        self.state.lock().expect("ledger mutex poisoned")
    }

    /// Run `f` against a consistent view of the ledger.
    pub fn read<R>(&self, f: impl FnOnce(&Blockchain) -> R) -> R {
        f(&self.lock())
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::Acquire)
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), RejectReason> {
        let txid = tx.txid.clone();
        let result = self.lock().submit_transaction(tx);
        if let Err(reason) = &result {
            warn!("MEMPOOL - rejected txid={txid}: {reason}");
        }
        result
    }

    /// Mine the next block from the mempool and append it.
    ///
    /// Returns `None` when there is nothing to mine (and `force` is off),
    /// when another mining call is in flight, when the progress hook
    /// abandons the search, or when the tip moved underneath the candidate.
    pub fn mine_next(
        &self,
        miner_address: &str,
        on_progress: Option<&mut dyn FnMut(&MiningProgress) -> ControlFlow<()>>,
        force: bool,
    ) -> Option<Block> {
        if !is_valid_address(miner_address) {
            warn!("MINER - refusing to mine to invalid address {miner_address:?}");
            return None;
        }
        if self
            .mining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("MINER - mining already in progress, skipping");
            return None;
        }
        let _guard = MiningGuard(&self.mining);

        let (mut template, difficulty) = {
            let bc = self.lock();
            (bc.block_template(miner_address, force)?, bc.difficulty())
        };

        // Lock released: the search may take a while.
        template.block.mine(difficulty, miner_address, on_progress)?;

        let (block, snapshot) = {
            let mut bc = self.lock();
            let block = bc.commit_template(template)?.clone();
            (block, self.snapshot(&bc))
        };
        self.persist(snapshot, block.index);
        Some(block)
    }

    /// Append a block mined elsewhere. Its transactions leave the mempool
    /// and the new state is saved, as for a locally mined block.
    pub fn append_block(&self, block: Block) -> bool {
        let index = block.index;
        let included: HashSet<String> = block
            .transactions
            .iter()
            .map(|tx| tx.txid.clone())
            .collect();
        let snapshot = {
            let mut bc = self.lock();
            if !bc.append_block(block) {
                return false;
            }
            bc.evict(&included);
            self.snapshot(&bc)
        };
        self.persist(snapshot, index);
        true
    }

    fn snapshot(&self, bc: &Blockchain) -> Option<LedgerSnapshot> {
        self.store.as_ref().map(|_| bc.snapshot())
    }

    fn persist(&self, snapshot: Option<LedgerSnapshot>, index: u64) {
        if let (Some(store), Some(snapshot)) = (&self.store, snapshot) {
            if let Err(e) = store.save(&snapshot) {
                error!("STORE - failed to save after block #{index}: {e}");
            }
        }
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.lock().balance(address)
    }

    pub fn mempool(&self) -> Vec<Transaction> {
        self.lock().mempool().to_vec()
    }

    pub fn mempool_len(&self) -> usize {
        self.lock().mempool().len()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.lock().block(index).cloned()
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.lock().block_by_hash(hash).cloned()
    }

    pub fn transaction(&self, txid: &str) -> Option<(Transaction, TxLocation)> {
        self.lock()
            .transaction(txid)
            .map(|(tx, location)| (tx.clone(), location))
    }

    pub fn is_chain_valid(&self) -> bool {
        self.lock().is_chain_valid()
    }

    pub fn stats(&self) -> LedgerStats {
        let is_mining = self.is_mining();
        let bc = self.lock();
        LedgerStats {
            height: bc.height(),
            blocks: bc.len(),
            latest_hash: bc.last_block().hash.clone(),
            mempool_size: bc.mempool().len(),
            total_supply: bc.params().max_supply,
            current_supply: bc.current_supply(),
            difficulty: bc.difficulty(),
            current_reward: bc.current_reward(),
            is_valid: bc.is_chain_valid(),
            is_mining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    const MINER: &str = "GSC1cccccccccccccccccccccccccccccccc";
    const ALICE: &str = "GSC1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn genesis_transfer(ledger: &Ledger, amount: i64) -> Transaction {
        let genesis = ledger.read(|bc| bc.params().genesis_address.clone());
        Transaction::new(genesis, ALICE, Amount::from_coins(amount), Amount::ZERO)
    }

    #[test]
    fn mines_submitted_transactions() {
        let ledger = Ledger::new(ChainParams::with_difficulty(1));
        ledger.submit_transaction(genesis_transfer(&ledger, 10)).unwrap();

        let block = ledger.mine_next(MINER, None, false).expect("mined");
        assert_eq!(block.index, 1);
        assert_eq!(ledger.balance(ALICE), Amount::from_coins(10));
        assert_eq!(ledger.mempool_len(), 0);
        assert!(!ledger.is_mining());
        assert!(ledger.is_chain_valid());

        let stats = ledger.stats();
        assert_eq!(stats.height, 1);
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.latest_hash, block.hash);
        assert!(stats.is_valid);
    }

    #[test]
    fn appended_block_evicts_its_transactions() {
        let ledger = Ledger::new(ChainParams::with_difficulty(1));
        let tx = genesis_transfer(&ledger, 4);
        ledger.submit_transaction(tx.clone()).unwrap();

        let mut block = ledger.read(|bc| {
            let tip = bc.last_block();
            Block::new(tip.index + 1, vec![tx.clone()], tip.hash.clone(), 1)
        });
        block.mine(1, MINER, None).unwrap();
        let hash = block.hash.clone();

        assert!(ledger.append_block(block.clone()));
        assert!(!ledger.append_block(block));
        assert_eq!(ledger.mempool_len(), 0);
        assert_eq!(ledger.balance(ALICE), Amount::from_coins(4));
        assert!(ledger.block_by_hash(&hash).is_some());
    }

    #[test]
    fn empty_mempool_or_missing_miner_is_a_no_op() {
        let ledger = Ledger::new(ChainParams::with_difficulty(1));
        assert!(ledger.mine_next(MINER, None, false).is_none());
        assert!(ledger.mine_next("  ", None, true).is_none());
        assert!(ledger.mine_next("GSC1nothex", None, true).is_none());
        assert!(!ledger.is_mining());
        assert_eq!(ledger.stats().blocks, 1);
    }

    #[test]
    fn only_one_miner_at_a_time_and_ledger_stays_responsive() {
        // Difficulty high enough that the search never finishes on its own.
        let ledger = Ledger::new(ChainParams::with_difficulty(32));
        ledger.submit_transaction(genesis_transfer(&ledger, 5)).unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let shared = &ledger;
        thread::scope(|s| {
            let worker = s.spawn(move || {
                let mut signalled = false;
                let mut hook = |_: &MiningProgress| {
                    if !signalled {
                        signalled = true;
                        started_tx.send(()).unwrap();
                    }
                    match release_rx.try_recv() {
                        Ok(()) => ControlFlow::Break(()),
                        Err(_) => ControlFlow::Continue(()),
                    }
                };
                shared.mine_next(MINER, Some(&mut hook), false)
            });

            started_rx.recv().unwrap();
            assert!(ledger.is_mining());
            assert!(ledger.mine_next(MINER, None, true).is_none());

            // Submissions and reads proceed while the search runs.
            ledger.submit_transaction(genesis_transfer(&ledger, 6)).unwrap();
            assert_eq!(ledger.mempool_len(), 2);
            assert_eq!(ledger.stats().blocks, 1);

            release_tx.send(()).unwrap();
            assert!(worker.join().unwrap().is_none());
        });

        assert!(!ledger.is_mining());
        assert_eq!(ledger.mempool_len(), 2);
        assert_eq!(ledger.stats().blocks, 1);
    }

    #[test]
    fn saves_after_mining_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let ledger = Ledger::with_store(ChainParams::with_difficulty(1), StateStore::new(&path));
        ledger.submit_transaction(genesis_transfer(&ledger, 3)).unwrap();
        let block = ledger.mine_next(MINER, None, false).unwrap();
        assert!(path.exists());

        let resumed = Ledger::with_store(ChainParams::with_difficulty(1), StateStore::new(&path));
        assert_eq!(resumed.stats().blocks, 2);
        assert_eq!(resumed.block(1).map(|b| b.hash), Some(block.hash));
        assert_eq!(resumed.balance(ALICE), Amount::from_coins(3));
        assert!(resumed.is_chain_valid());
    }

    #[test]
    fn save_failure_keeps_the_appended_block() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let ledger = Ledger::with_store(
            ChainParams::with_difficulty(1),
            StateStore::new(blocker.join("state.json")),
        );
        assert!(ledger.mine_next(MINER, None, true).is_some());
        assert_eq!(ledger.stats().blocks, 2);
    }

    #[test]
    fn unreadable_state_falls_back_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"garbage").unwrap();

        let ledger = Ledger::with_store(ChainParams::with_difficulty(1), StateStore::new(&path));
        assert_eq!(ledger.stats().blocks, 1);
        let genesis = ledger.read(|bc| bc.params().genesis_address.clone());
        assert_eq!(ledger.balance(&genesis), Amount::from_coins(255));
    }
}
