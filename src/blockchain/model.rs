use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;

use super::block::MiningProgress;
use super::{Block, ChainParams, GENESIS_DIFFICULTY, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP_MS};
use crate::error::{BlockError, RejectReason};
use crate::storage::LedgerSnapshot;
use crate::transaction::{Amount, COINBASE, GENESIS, Transaction, is_valid_address};

/// Where a looked-up transaction currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "block_index")]
pub enum TxLocation {
    Block(u64),
    Mempool,
}

/// Candidate block plus the mempool entries it consumes.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub selected: Vec<String>,
}

/// In-memory ledger: the chain, pending transactions and the balance table
/// derived from the chain.
///
/// Not synchronized; [`super::Ledger`] wraps it for shared use.
#[derive(Debug)]
pub struct Blockchain {
    chain: Vec<Block>,
    mempool: Vec<Transaction>,
    balances: BTreeMap<String, Amount>,
    current_supply: Amount,
    params: ChainParams,
}

impl Blockchain {
    /// Initialize a ledger holding only the mined genesis block.
    pub fn new(params: ChainParams) -> Self {
        let mut bc = Self {
            chain: Vec::new(),
            mempool: Vec::new(),
            balances: BTreeMap::new(),
            current_supply: Amount::ZERO,
            params,
        };
        let genesis = bc.create_genesis();
        bc.chain.push(genesis);
        bc.recompute_balances();
        info!(
            "LEDGER - genesis {} created ({} -> {})",
            bc.chain[0].hash, bc.params.genesis_amount, bc.params.genesis_address
        );
        bc
    }

    fn create_genesis(&self) -> Block {
        let allocation = Transaction::with_timestamp(
            GENESIS,
            self.params.genesis_address.clone(),
            self.params.genesis_amount,
            Amount::ZERO,
            GENESIS_TIMESTAMP_MS,
        );
        let mut genesis = Block::with_timestamp(
            0,
            vec![allocation],
            GENESIS_TIMESTAMP_MS,
            GENESIS_PREVIOUS_HASH.to_string(),
            0,
            GENESIS_DIFFICULTY,
        );
        // Difficulty 1 is solved within a few dozen nonces.
        let _ = genesis.mine(GENESIS_DIFFICULTY, GENESIS, None);
        genesis
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn difficulty(&self) -> u32 {
        self.params.difficulty
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Index of the tip (0 when only genesis exists).
    pub fn height(&self) -> u64 {
        self.chain.len().saturating_sub(1) as u64
    }

    /// Return the last block in the chain.
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("Blockchain should always have at least the genesis block")
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn balances(&self) -> &BTreeMap<String, Amount> {
        &self.balances
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or_default()
    }

    /// Coins minted so far by `GENESIS` and `COINBASE` records.
    pub fn current_supply(&self) -> Amount {
        self.current_supply
    }

    /// Subsidy for the next block, capped by the remaining supply.
    pub fn current_reward(&self) -> Amount {
        let scheduled = self.params.subsidy_at(self.height());
        let remaining = self.params.max_supply - self.current_supply;
        scheduled.min(remaining).max(Amount::ZERO)
    }

    /// Total still owed by `sender` across pending transactions.
    fn pending_spend(&self, sender: &str) -> Amount {
        self.mempool
            .iter()
            .filter(|tx| tx.sender == sender)
            .map(Transaction::total_cost)
            .sum()
    }

    /// Validate `tx` and queue it. Funds are checked against the ledger
    /// balance minus everything the sender already has pending.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<(), RejectReason> {
        if !tx.is_valid() {
            return Err(RejectReason::InvalidTransaction);
        }
        if tx.is_system() {
            return Err(RejectReason::SystemSender(tx.sender));
        }
        if let Some(bad) = [&tx.sender, &tx.receiver]
            .into_iter()
            .find(|a| !is_valid_address(a))
        {
            return Err(RejectReason::InvalidAddress(bad.clone()));
        }
        if self.mempool.iter().any(|p| p.txid == tx.txid) {
            return Err(RejectReason::Duplicate(tx.txid));
        }
        if self.find_in_chain(&tx.txid).is_some() {
            return Err(RejectReason::AlreadyMined(tx.txid));
        }

        let balance = self.balance(&tx.sender);
        let required = self.pending_spend(&tx.sender) + tx.total_cost();
        if balance < required {
            return Err(RejectReason::InsufficientFunds {
                required,
                available: balance,
            });
        }

        debug!(
            "MEMPOOL - txid={} accepted ({} -> {}: {} + fee {}), size now {}",
            tx.txid,
            tx.sender,
            tx.receiver,
            tx.amount,
            tx.fee,
            self.mempool.len() + 1
        );
        self.mempool.push(tx);
        Ok(())
    }

    /// Assemble the next unmined block: coinbase first, then up to the
    /// per-block cap of mempool entries in queue order.
    pub fn block_template(&self, miner_address: &str, force: bool) -> Option<BlockTemplate> {
        if self.mempool.is_empty() && !force {
            return None;
        }
        if !is_valid_address(miner_address) {
            warn!("MINER - invalid miner address {miner_address:?}");
            return None;
        }

        let picked: Vec<Transaction> = self
            .mempool
            .iter()
            .take(self.params.max_txs_per_block)
            .cloned()
            .collect();
        let fees: Amount = picked.iter().map(|tx| tx.fee).sum();
        let reward = self.current_reward();
        let selected = picked.iter().map(|tx| tx.txid.clone()).collect();

        let tip = self.last_block();
        // Strictly after the tip, so coinbase txids never repeat.
        let timestamp = Utc::now().timestamp_millis().max(tip.timestamp + 1);

        let mut txs = Vec::with_capacity(picked.len() + 1);
        // A zero reward would be an invalid record; late blocks carry fees only.
        if reward.is_positive() {
            txs.push(Transaction::with_timestamp(
                COINBASE,
                miner_address,
                reward,
                Amount::ZERO,
                timestamp,
            ));
        }
        txs.extend(picked);

        let mut block = Block::with_timestamp(
            tip.index + 1,
            txs,
            timestamp,
            tip.hash.clone(),
            0,
            self.params.difficulty,
        );
        block.miner = miner_address.to_string();
        block.reward = reward;
        block.fees = fees;

        Some(BlockTemplate { block, selected })
    }

    /// Append a mined template and evict exactly its selected transactions.
    pub fn commit_template(&mut self, template: BlockTemplate) -> Option<&Block> {
        if !self.append_block(template.block) {
            return None;
        }
        let included: HashSet<String> = template.selected.into_iter().collect();
        self.evict(&included);
        Some(self.last_block())
    }

    /// Drop the given identifiers from the mempool.
    pub(super) fn evict(&mut self, included: &HashSet<String>) {
        let before = self.mempool.len();
        self.mempool.retain(|tx| !included.contains(&tx.txid));
        debug!(
            "MEMPOOL - cleaned: {} -> {} (removed {})",
            before,
            self.mempool.len(),
            before - self.mempool.len()
        );
    }

    /// Build, mine and append the next block while holding `&mut self`.
    ///
    /// [`super::Ledger::mine_next`] is the variant that releases the ledger
    /// during the nonce search.
    pub fn mine_next(
        &mut self,
        miner_address: &str,
        on_progress: Option<&mut dyn FnMut(&MiningProgress) -> ControlFlow<()>>,
        force: bool,
    ) -> Option<&Block> {
        let mut template = self.block_template(miner_address, force)?;
        template
            .block
            .mine(self.params.difficulty, miner_address, on_progress)?;
        self.commit_template(template)
    }

    /// Validate `block` against the tip; on success push it and rebuild
    /// balances. Leaves the ledger untouched on failure.
    pub fn append_block(&mut self, block: Block) -> bool {
        if let Err(e) = self.check_block(&block) {
            warn!(
                "LEDGER - rejected block #{} (hash={}): {e}",
                block.index, block.hash
            );
            return false;
        }
        info!(
            "LEDGER - appended block #{} hash={} txs={}",
            block.index,
            block.hash,
            block.transactions.len()
        );
        self.chain.push(block);
        self.recompute_balances();
        true
    }

    /// Consensus rules for the block after the tip: structural validity,
    /// the ledger's own difficulty, one leading coinbase within the reward,
    /// well-formed addresses, no replays and funded senders.
    fn check_block(&self, block: &Block) -> Result<(), BlockError> {
        let tip = self.last_block();
        if block.index != tip.index + 1 {
            return Err(BlockError::NotNext {
                index: block.index,
                tip: tip.index,
            });
        }
        if block.difficulty != self.params.difficulty {
            return Err(BlockError::Difficulty {
                expected: self.params.difficulty,
                found: block.difficulty,
            });
        }
        if !block.is_valid(Some(tip)) {
            return Err(BlockError::Invalid);
        }

        let txs = &block.transactions;
        let coinbases = txs.iter().filter(|tx| tx.sender == COINBASE).count();
        if coinbases > 1 || (coinbases == 1 && txs[0].sender != COINBASE) {
            return Err(BlockError::MisplacedCoinbase);
        }
        if let Some(coinbase) = txs.first().filter(|tx| tx.sender == COINBASE) {
            let allowed = self.current_reward();
            if coinbase.amount > allowed {
                return Err(BlockError::ExcessReward {
                    paid: coinbase.amount,
                    allowed,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut spends: BTreeMap<&str, Amount> = BTreeMap::new();
        for tx in txs {
            if tx.sender == GENESIS {
                return Err(BlockError::GenesisRecord);
            }
            if !seen.insert(tx.txid.as_str()) || self.find_in_chain(&tx.txid).is_some() {
                return Err(BlockError::Replay(tx.txid.clone()));
            }
            if !is_valid_address(&tx.receiver) {
                return Err(BlockError::InvalidAddress(tx.receiver.clone()));
            }
            if tx.is_system() {
                continue;
            }
            if !is_valid_address(&tx.sender) {
                return Err(BlockError::InvalidAddress(tx.sender.clone()));
            }
            *spends.entry(tx.sender.as_str()).or_default() += tx.total_cost();
        }
        for (sender, required) in spends {
            let available = self.balance(sender);
            if required > available {
                return Err(BlockError::InsufficientFunds {
                    sender: sender.to_string(),
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Rebuild balances and issued supply from the whole chain.
    ///
    /// Senders pay amount + fee (system senders pay nothing), receivers get
    /// the amount, and the block's miner collects every non-coinbase fee.
    pub fn recompute_balances(&mut self) {
        let mut balances: BTreeMap<String, Amount> = BTreeMap::new();
        let mut supply = Amount::ZERO;

        for block in &self.chain {
            for tx in &block.transactions {
                if tx.is_system() {
                    supply += tx.amount;
                } else {
                    *balances.entry(tx.sender.clone()).or_default() -= tx.total_cost();
                }
                *balances.entry(tx.receiver.clone()).or_default() += tx.amount;
                if tx.sender != COINBASE && tx.fee.is_positive() {
                    *balances.entry(block.miner.clone()).or_default() += tx.fee;
                }
            }
        }

        self.balances = balances;
        self.current_supply = supply;
    }

    /// Genesis must be self-consistent; every later block must validate
    /// against its predecessor.
    pub fn is_chain_valid(&self) -> bool {
        let Some(genesis) = self.chain.first() else {
            return false;
        };
        if genesis.index != 0
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
            || !genesis.is_valid(None)
        {
            return false;
        }
        self.chain
            .windows(2)
            .all(|pair| pair[1].is_valid(Some(&pair[0])))
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.chain.get(i))
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash == hash)
    }

    /// Up to `limit` blocks, newest first.
    pub fn recent_blocks(&self, limit: usize) -> Vec<&Block> {
        self.chain.iter().rev().take(limit).collect()
    }

    fn find_in_chain(&self, txid: &str) -> Option<(&Transaction, u64)> {
        self.chain.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.txid == txid)
                .map(|tx| (tx, block.index))
        })
    }

    /// Search the chain first, then the mempool.
    pub fn transaction(&self, txid: &str) -> Option<(&Transaction, TxLocation)> {
        if let Some((tx, index)) = self.find_in_chain(txid) {
            return Some((tx, TxLocation::Block(index)));
        }
        self.mempool
            .iter()
            .find(|tx| tx.txid == txid)
            .map(|tx| (tx, TxLocation::Mempool))
    }

    /// Full state document for the persistence layer.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            mempool: self.mempool.clone(),
            balances: self.balances.clone(),
            current_supply: self.current_supply,
            difficulty: self.params.difficulty,
        }
    }

    /// Adopt a persisted state. Only a chain longer than genesis replaces
    /// the fresh one; stored hashes and balances are trusted as-is.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) -> bool {
        if snapshot.chain.len() <= 1 {
            debug!("LEDGER - stored chain holds only genesis, keeping fresh chain");
            return false;
        }
        if snapshot.difficulty != self.params.difficulty {
            warn!(
                "LEDGER - stored difficulty {} differs from configured {}",
                snapshot.difficulty, self.params.difficulty
            );
        }
        self.chain = snapshot.chain;
        self.mempool = snapshot.mempool;
        self.balances = snapshot.balances;
        self.current_supply = snapshot.current_supply;
        info!(
            "LEDGER - restored {} blocks, {} pending transactions",
            self.chain.len(),
            self.mempool.len()
        );
        true
    }
}
