use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use super::{MAX_DIFFICULTY, PROGRESS_INTERVAL};
use crate::transaction::{Amount, Transaction};

/// A single block in the chain holding an ordered batch of transactions.
///
/// Deserialization trusts the stored `hash` and `merkle_root`; tampering is
/// only caught by [`Block::is_valid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64, // Unix milliseconds (UTC)
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub nonce: u64,      // Proof-of-Work nonce
    pub difficulty: u32, // Required leading zero hex digits
    pub hash: String,    // Cached hash of the header
    pub merkle_root: String,
    #[serde(default)]
    pub miner: String,
    /// Subsidy paid by this block's coinbase.
    #[serde(default)]
    pub reward: Amount,
    /// Fees of the included transactions, credited to `miner`.
    #[serde(default)]
    pub fees: Amount,
}

/// Snapshot handed to the progress hook while mining.
#[derive(Debug, Clone, Serialize)]
pub struct MiningProgress {
    pub hash_rate: f64,
    pub nonce: u64,
    pub hash: String,
    pub target: String,
}

/// Outcome of a successful nonce search.
#[derive(Debug, Clone)]
pub struct MiningReport {
    pub nonce: u64,
    pub hash: String,
    pub elapsed: Duration,
    pub hash_rate: f64,
}

impl Block {
    /// Create a block stamped with the current time (not mined yet).
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        difficulty: u32,
    ) -> Self {
        Self::with_timestamp(
            index,
            transactions,
            Utc::now().timestamp_millis(),
            previous_hash,
            0,
            difficulty,
        )
    }

    /// Create a block with explicit header fields. The Merkle root and the
    /// provisional hash are computed from the supplied nonce.
    pub fn with_timestamp(
        index: u64,
        transactions: Vec<Transaction>,
        timestamp: i64,
        previous_hash: String,
        nonce: u64,
        difficulty: u32,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            merkle_root: merkle_root(&transactions),
            transactions,
            previous_hash,
            nonce,
            difficulty,
            hash: String::new(),
            miner: String::new(),
            reward: Amount::ZERO,
            fees: Amount::ZERO,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Recompute the Merkle root over the current transaction list.
    pub fn compute_merkle_root(&self) -> String {
        merkle_root(&self.transactions)
    }

    /// SHA-256 of `index:previous_hash:timestamp:txs_json:nonce:merkle_root`.
    pub fn compute_hash(&self) -> String {
        let (prefix, suffix) = self.preimage_parts();
        hash_with_nonce(&prefix, self.nonce, &suffix)
    }

    // Everything but the nonce, so the mining loop serializes transactions once.
    fn preimage_parts(&self) -> (String, String) {
        // Plain records with string keys always serialize.
        let txs_json = serde_json::to_string(&self.transactions).unwrap_or_default();
        let prefix = format!(
            "{}:{}:{}:{}:",
            self.index, self.previous_hash, self.timestamp, txs_json
        );
        let suffix = format!(":{}", self.merkle_root);
        (prefix, suffix)
    }

    /// Search for a nonce whose hash has `difficulty` leading hex zeros.
    ///
    /// Blocks the calling thread until a solution is found. Every
    /// [`PROGRESS_INTERVAL`] attempts `on_progress` is called; returning
    /// `ControlFlow::Break` abandons the search and yields `None`. A
    /// difficulty above [`MAX_DIFFICULTY`] yields `None` at once.
    pub fn mine(
        &mut self,
        difficulty: u32,
        miner_address: &str,
        mut on_progress: Option<&mut dyn FnMut(&MiningProgress) -> ControlFlow<()>>,
    ) -> Option<MiningReport> {
        if difficulty > MAX_DIFFICULTY {
            warn!("MINER - difficulty {difficulty} can never be met");
            return None;
        }
        self.difficulty = difficulty;
        self.miner = miner_address.to_string();
        self.merkle_root = self.compute_merkle_root();

        let target = "0".repeat(difficulty as usize);
        let (prefix, suffix) = self.preimage_parts();
        self.hash = hash_with_nonce(&prefix, self.nonce, &suffix);

        info!(
            "MINER - mining block #{} ({} txs, difficulty {})",
            self.index,
            self.transactions.len(),
            difficulty
        );

        let started = Instant::now();
        let mut attempts: u64 = 0;
        while !self.hash.starts_with(&target) {
            self.nonce = self.nonce.wrapping_add(1);
            self.hash = hash_with_nonce(&prefix, self.nonce, &suffix);
            attempts += 1;

            if attempts % PROGRESS_INTERVAL == 0 {
                if let Some(hook) = on_progress.as_deref_mut() {
                    let progress = MiningProgress {
                        hash_rate: rate(attempts, started.elapsed()),
                        nonce: self.nonce,
                        hash: self.hash.clone(),
                        target: target.clone(),
                    };
                    if hook(&progress).is_break() {
                        debug!(
                            "MINER - block #{} abandoned at nonce {}",
                            self.index, self.nonce
                        );
                        return None;
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let report = MiningReport {
            nonce: self.nonce,
            hash: self.hash.clone(),
            elapsed,
            hash_rate: rate(attempts.max(1), elapsed),
        };
        info!(
            "MINER - block #{} mined: hash={} nonce={} in {:.2?} ({:.0} H/s)",
            self.index, report.hash, report.nonce, report.elapsed, report.hash_rate
        );
        Some(report)
    }

    /// Check hash integrity, linkage to `previous`, proof of work, Merkle
    /// root and every embedded transaction. Pure.
    pub fn is_valid(&self, previous: Option<&Block>) -> bool {
        if self.hash != self.compute_hash() {
            debug!("block #{}: hash mismatch", self.index);
            return false;
        }
        if let Some(prev) = previous {
            if self.previous_hash != prev.hash {
                debug!("block #{}: previous hash mismatch", self.index);
                return false;
            }
        }
        if !meets_difficulty(&self.hash, self.difficulty) {
            debug!("block #{}: insufficient proof of work", self.index);
            return false;
        }
        if self.merkle_root != self.compute_merkle_root() {
            debug!("block #{}: merkle root mismatch", self.index);
            return false;
        }
        if let Some(pos) = self.transactions.iter().position(|tx| !tx.is_valid()) {
            debug!("block #{}: invalid transaction at position {}", self.index, pos);
            return false;
        }
        true
    }
}

/// True when `hash` starts with at least `difficulty` hex zeros.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let d = difficulty as usize;
    hash.len() >= d && hash.bytes().take(d).all(|b| b == b'0')
}

/// Merkle root over transaction ids. Odd levels duplicate their last leaf;
/// an empty list hashes the empty string.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return sha256_hex(b"");
    }
    let mut level: Vec<String> = transactions.iter().map(|tx| tx.txid.clone()).collect();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().cloned() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }
    level.swap_remove(0)
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hash_with_nonce(prefix: &str, nonce: u64, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(suffix.as_bytes());
    hex::encode(hasher.finalize())
}

fn rate(attempts: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { attempts as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{COINBASE, Transaction};

    fn tx(sender: &str, receiver: &str, amount: i64, ts: i64) -> Transaction {
        Transaction::with_timestamp(sender, receiver, Amount::from_coins(amount), Amount::ZERO, ts)
    }

    fn mined_block(difficulty: u32) -> Block {
        let txs = vec![
            tx(COINBASE, "miner", 50, 1),
            tx("alice", "bob", 3, 2),
            tx("bob", "carol", 1, 3),
        ];
        let mut b = Block::with_timestamp(1, txs, 10, "prev".into(), 0, difficulty);
        b.mine(difficulty, "miner", None).expect("mined");
        b
    }

    #[test]
    fn construction_computes_root_and_hash() {
        let b = Block::with_timestamp(3, vec![tx("a", "b", 1, 1)], 5, "p".into(), 7, 2);
        assert_eq!(b.nonce, 7);
        assert_eq!(b.merkle_root, b.compute_merkle_root());
        assert_eq!(b.hash, b.compute_hash());
    }

    #[test]
    fn mining_produces_leading_zeros() {
        let b = mined_block(2);
        assert!(b.hash.starts_with("00"));
        assert_eq!(b.hash, b.compute_hash());
        assert_eq!(b.miner, "miner");
        assert!(b.is_valid(None));
    }

    #[test]
    fn mining_reports_progress_and_can_be_abandoned() {
        let mut b = Block::with_timestamp(1, vec![tx("a", "b", 1, 1)], 1, "p".into(), 0, 16);
        let mut calls = 0;
        let mut hook = |p: &MiningProgress| {
            calls += 1;
            assert_eq!(p.target.len(), 16);
            ControlFlow::Break(())
        };
        assert!(b.mine(16, "m", Some(&mut hook)).is_none());
        assert_eq!(calls, 1);
        assert_eq!(b.nonce, PROGRESS_INTERVAL);
    }

    #[test]
    fn unreachable_difficulty_is_refused() {
        let mut b = Block::with_timestamp(1, vec![tx("a", "b", 1, 1)], 1, "p".into(), 0, 2);
        assert!(b.mine(MAX_DIFFICULTY + 1, "m", None).is_none());
        assert!(b.mine(u32::MAX, "m", None).is_none());
        assert_eq!(b.nonce, 0);
    }

    #[test]
    fn empty_merkle_root_is_hash_of_empty_string() {
        assert_eq!(
            merkle_root(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn merkle_root_duplicates_odd_leaf() {
        let txs = vec![tx("a", "b", 1, 1), tx("a", "b", 2, 2), tx("a", "b", 3, 3)];
        let h = |s: String| sha256_hex(s.as_bytes());
        let left = h(format!("{}{}", txs[0].txid, txs[1].txid));
        let right = h(format!("{}{}", txs[2].txid, txs[2].txid));
        assert_eq!(merkle_root(&txs), h(format!("{left}{right}")));
    }

    #[test]
    fn merkle_root_is_order_sensitive() {
        let a = tx("a", "b", 1, 1);
        let b = tx("c", "d", 2, 2);
        assert_ne!(
            merkle_root(&[a.clone(), b.clone()]),
            merkle_root(&[b, a])
        );
    }

    #[test]
    fn invalid_when_mutated() {
        let mut b = mined_block(2);
        b.transactions.push(tx("x", "y", 1, 9));
        assert!(!b.is_valid(None));

        let mut b = mined_block(2);
        b.merkle_root = "00".into();
        assert!(!b.is_valid(None));

        let mut b = mined_block(2);
        b.hash = "00".repeat(32);
        assert!(!b.is_valid(None));
    }

    #[test]
    fn invalid_when_linkage_or_pow_fails() {
        let b = mined_block(1);
        let mut other = b.clone();
        other.hash = "ffff".into();
        assert!(!b.is_valid(Some(&other)));

        // Claiming a higher difficulty than the hash satisfies.
        let mut b = mined_block(1);
        b.difficulty = 64;
        assert!(!b.is_valid(None));
    }

    #[test]
    fn invalid_when_embedded_transaction_is_invalid() {
        let mut bad = tx("alice", "bob", 1, 1);
        bad.amount = Amount::from_coins(9);
        let mut b = Block::with_timestamp(1, vec![bad], 1, "p".into(), 0, 1);
        b.mine(1, "m", None).expect("mined");
        assert!(!b.is_valid(None));
    }

    #[test]
    fn deserialization_trusts_stored_hash() {
        let b = mined_block(1);
        let mut json = serde_json::to_value(&b).unwrap();
        json["hash"] = serde_json::Value::String("0bogus".into());
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back.hash, "0bogus");
        assert!(!back.is_valid(None));
    }

    #[test]
    fn difficulty_predicate() {
        assert!(meets_difficulty("000abc", 3));
        assert!(!meets_difficulty("00abc", 3));
        assert!(!meets_difficulty("00", 3));
        assert!(meets_difficulty("abc", 0));
    }
}
