use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::blockchain::{Block, Ledger};

/// Background trigger for `mine_next`: mines only when transactions are
/// pending and no other mining call is running. Never forces empty blocks.
pub struct AutoMiner {
    ledger: Arc<Ledger>,
    miner_address: String,
}

/// Handle to a running auto-miner thread.
pub struct AutoMinerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl AutoMiner {
    pub fn new(ledger: Arc<Ledger>, miner_address: impl Into<String>) -> Self {
        Self {
            ledger,
            miner_address: miner_address.into(),
        }
    }

    /// One scheduler step.
    pub fn tick(&self) -> Option<Block> {
        if self.ledger.is_mining() || self.ledger.mempool_len() == 0 {
            return None;
        }
        let block = self.ledger.mine_next(&self.miner_address, None, false)?;
        info!(
            "MINER - auto-mined block #{} with {} txs",
            block.index,
            block.transactions.len()
        );
        Some(block)
    }

    /// Run `tick` every `interval` on a dedicated thread.
    pub fn spawn(self, interval: Duration) -> AutoMinerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            info!(
                "MINER - auto-mining to {} every {:?}",
                self.miner_address, interval
            );
            while !flag.load(Ordering::Acquire) {
                self.tick();
                thread::sleep(interval);
            }
            debug!("MINER - auto-miner stopped");
        });
        AutoMinerHandle { stop, thread }
    }
}

impl AutoMinerHandle {
    /// Ask the loop to exit and wait for it. A block being mined is finished first.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.thread.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ChainParams;
    use crate::transaction::{Amount, Transaction};

    const MINER: &str = "GSC1cccccccccccccccccccccccccccccccc";

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::new(ChainParams::with_difficulty(1)))
    }

    #[test]
    fn tick_skips_empty_mempool() {
        let ledger = ledger();
        let miner = AutoMiner::new(Arc::clone(&ledger), MINER);
        assert!(miner.tick().is_none());
        assert_eq!(ledger.stats().blocks, 1);
    }

    #[test]
    fn tick_mines_pending_transactions() {
        let ledger = ledger();
        let genesis = ledger.read(|bc| bc.params().genesis_address.clone());
        ledger
            .submit_transaction(Transaction::new(
                genesis,
                "GSC1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                Amount::from_coins(1),
                Amount::ZERO,
            ))
            .unwrap();

        let miner = AutoMiner::new(Arc::clone(&ledger), MINER);
        let block = miner.tick().expect("mined");
        assert_eq!(block.index, 1);
        assert_eq!(ledger.mempool_len(), 0);
        assert!(miner.tick().is_none());
    }

    #[test]
    fn spawned_loop_mines_and_stops() {
        let ledger = ledger();
        let genesis = ledger.read(|bc| bc.params().genesis_address.clone());
        ledger
            .submit_transaction(Transaction::new(
                genesis,
                "GSC1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                Amount::from_coins(2),
                Amount::ZERO,
            ))
            .unwrap();

        let handle = AutoMiner::new(Arc::clone(&ledger), MINER).spawn(Duration::from_millis(5));
        for _ in 0..400 {
            if ledger.mempool_len() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();
        assert_eq!(ledger.mempool_len(), 0);
        assert_eq!(ledger.stats().blocks, 2);
    }
}
