use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::amount::Amount;

/// Sender of block rewards.
pub const COINBASE: &str = "COINBASE";
/// Sender of the bootstrap allocation in block 0.
pub const GENESIS: &str = "GENESIS";

/// Prefix of every account address.
pub const ADDRESS_PREFIX: &str = "GSC1";

/// `GSC1` followed by 32 hex digits. Sentinels are not addresses.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_PREFIX.len() + 32
        && address.starts_with(ADDRESS_PREFIX)
        && address[ADDRESS_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

/// True for the sentinel senders that mint coins instead of spending them.
pub fn is_system_sender(sender: &str) -> bool {
    sender == COINBASE || sender == GENESIS
}

/// An account-to-account transfer.
///
/// Deserialization trusts the stored `txid`; call [`Transaction::is_valid`]
/// to detect tampering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash of sender, receiver, amount, fee and timestamp.
    pub txid: String,
    pub sender: String,
    pub receiver: String,
    pub amount: Amount,
    pub fee: Amount,
    pub timestamp: i64, // Unix milliseconds (UTC)
    /// Opaque placeholder carried for clients; never verified.
    #[serde(default)]
    pub signature: String,
}

impl Transaction {
    /// Build a transaction stamped with the current time.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        fee: Amount,
    ) -> Self {
        Self::with_timestamp(sender, receiver, amount, fee, Utc::now().timestamp_millis())
    }

    /// Build a transaction with an explicit timestamp and compute its txid.
    pub fn with_timestamp(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        fee: Amount,
        timestamp: i64,
    ) -> Self {
        let mut tx = Self {
            txid: String::new(),
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            fee,
            timestamp,
            signature: String::new(),
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// SHA-256 (hex) over the concatenated content fields.
    pub fn compute_txid(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}",
            self.sender, self.receiver, self.amount, self.fee, self.timestamp
        );
        hex::encode(Sha256::digest(preimage.as_bytes()))
    }

    pub fn is_system(&self) -> bool {
        is_system_sender(&self.sender)
    }

    /// Total debited from the sender.
    pub fn total_cost(&self) -> Amount {
        self.amount + self.fee
    }

    /// Structural validity: parties present, amount > 0, fee >= 0, and for
    /// ordinary senders a txid matching the content.
    pub fn is_valid(&self) -> bool {
        if self.sender.is_empty() || self.receiver.is_empty() {
            return false;
        }
        if !self.amount.is_positive() || self.fee.is_negative() {
            return false;
        }
        self.is_system() || self.txid == self.compute_txid()
    }
}
