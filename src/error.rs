//! Error types surfaced by the ledger and its persistence layer.

use thiserror::Error;

use crate::transaction::Amount;

/// Why a transaction was refused admission to the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Empty parties, non-positive amount, negative fee or a txid that
    /// does not match the content.
    #[error("invalid transaction")]
    InvalidTransaction,

    /// `COINBASE`/`GENESIS` records are minted by the ledger only.
    #[error("system sender {0} cannot submit transactions")]
    SystemSender(String),

    /// Sender or receiver is not a `GSC1` address.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("transaction {0} is already pending")]
    Duplicate(String),

    #[error("transaction {0} is already in the chain")]
    AlreadyMined(String),

    /// Balance does not cover this transfer plus the sender's pending ones.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },
}

/// Why a block was refused on top of the current tip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block #{index} does not follow tip #{tip}")]
    NotNext { index: u64, tip: u64 },

    /// Hash, linkage, proof of work, Merkle root or a record failed.
    #[error("block does not validate against the tip")]
    Invalid,

    #[error("block difficulty {found} differs from ledger difficulty {expected}")]
    Difficulty { expected: u32, found: u32 },

    #[error("coinbase must be a single record in first position")]
    MisplacedCoinbase,

    #[error("coinbase pays {paid} but the reward is {allowed}")]
    ExcessReward { paid: Amount, allowed: Amount },

    #[error("genesis allocation outside block 0")]
    GenesisRecord,

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("transaction {0} appears twice")]
    Replay(String),

    #[error("{sender} spends {required} with only {available} available")]
    InsufficientFunds {
        sender: String,
        required: Amount,
        available: Amount,
    },
}

/// Failures while reading or writing the persisted ledger document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
