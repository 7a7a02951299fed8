use crate::blockchain::{Block, Ledger, TxLocation};
use crate::transaction::{Amount, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state: one ledger behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Deserialize)]
pub struct BlocksQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct BlocksResponse {
    pub height: u64,
    pub blocks: Vec<Block>, // newest first
}

#[derive(Serialize)]
pub struct AppendBlockResponse {
    pub appended: bool,
    pub height: u64,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub length: usize,
    pub difficulty: u32,
}

/* ---------- TX API Models ---------- */

#[derive(Deserialize)]
pub struct NewTxRequest {
    pub sender: String,
    pub receiver: String,
    pub amount: Amount,
    #[serde(default)]
    pub fee: Amount,
    /// Unix milliseconds; defaults to now.
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
pub struct NewTxResponse {
    pub accepted: bool,
    pub txid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct MempoolResponse {
    pub size: usize,
    pub transactions: Vec<Transaction>,
}

#[derive(Serialize)]
pub struct TxLookupResponse {
    pub transaction: Transaction,
    pub location: TxLocation,
}

/* ---------- Mining API Models ---------- */

#[derive(Deserialize)]
pub struct MineRequest {
    pub miner_address: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct MineResponse {
    pub mined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: Amount,
}
