pub mod block;
pub mod ledger;
pub mod model;

pub use block::{Block, MiningProgress};
pub use ledger::Ledger;
pub use model::{Blockchain, TxLocation};

use crate::transaction::Amount;

/// Default Proof-of-Work difficulty (number of leading hex zeros).
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// A SHA-256 hex digest has 64 digits; no higher target can be met.
pub const MAX_DIFFICULTY: u32 = 64;

/// Genesis is always mined at this difficulty.
pub const GENESIS_DIFFICULTY: u32 = 1;

/// Base block subsidy before any halving.
pub const BASE_REWARD_COINS: i64 = 50;

/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Reward is zero once this many halvings have happened.
pub const MAX_HALVINGS: u64 = 64;

/// Hard cap on coins ever issued (21.75 trillion).
pub const MAX_SUPPLY_COINS: i64 = 21_750_000_000_000;

/// Mempool entries taken per block (coinbase excluded).
pub const MAX_TXS_PER_BLOCK: usize = 10;

/// Previous-hash sentinel of block 0.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub const GENESIS_ADDRESS: &str = "GSC1705641e65321ef23ac5fb3d470f39627";
pub const GENESIS_AMOUNT_COINS: i64 = 255;

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const GENESIS_TIMESTAMP_MS: i64 = 1_704_067_200_000;

/// Mining progress is reported every this many nonces.
pub const PROGRESS_INTERVAL: u64 = 1_000;

/// Protocol parameters of a ledger instance. Fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub difficulty: u32,
    pub base_reward: Amount,
    pub halving_interval: u64,
    pub max_supply: Amount,
    pub max_txs_per_block: usize,
    pub genesis_address: String,
    pub genesis_amount: Amount,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            base_reward: Amount::from_coins(BASE_REWARD_COINS),
            halving_interval: HALVING_INTERVAL,
            max_supply: Amount::from_coins(MAX_SUPPLY_COINS),
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            genesis_address: GENESIS_ADDRESS.to_string(),
            genesis_amount: Amount::from_coins(GENESIS_AMOUNT_COINS),
        }
    }
}

impl ChainParams {
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    /// Subsidy schedule: `base / 2^(height / interval)`, zero after 64 halvings.
    pub fn subsidy_at(&self, height: u64) -> Amount {
        let halvings = height / self.halving_interval.max(1);
        if halvings >= MAX_HALVINGS {
            return Amount::ZERO;
        }
        self.base_reward.halved(halvings as u32)
    }
}
