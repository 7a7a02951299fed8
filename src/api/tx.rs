use actix_web::{HttpResponse, Responder, get, post, web};
use chrono::Utc;
use log::{debug, info};
use std::time::Instant;

use super::models::{AppState, MempoolResponse, NewTxRequest, NewTxResponse, TxLookupResponse};
use crate::transaction::Transaction;

/// Submit a new transaction into the mempool.
#[post("/tx/")]
pub async fn post_transaction(
    state: web::Data<AppState>,
    body: web::Json<NewTxRequest>,
) -> impl Responder {
    let t0 = Instant::now();
    let req = body.into_inner();
    debug!(
        "POST /tx/ - received: {} -> {} amount={} fee={}",
        req.sender, req.receiver, req.amount, req.fee
    );

    let timestamp = req.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
    let mut tx =
        Transaction::with_timestamp(req.sender, req.receiver, req.amount, req.fee, timestamp);
    tx.signature = req.signature;
    let txid = tx.txid.clone();

    match state.ledger.submit_transaction(tx) {
        Ok(()) => {
            info!(
                "POST /tx/ - txid={} OK ({} ms)",
                txid,
                t0.elapsed().as_millis()
            );
            HttpResponse::Ok().json(NewTxResponse {
                accepted: true,
                txid,
                reason: None,
            })
        }
        Err(reason) => HttpResponse::BadRequest().json(NewTxResponse {
            accepted: false,
            txid,
            reason: Some(reason.to_string()),
        }),
    }
}

/// List current mempool in queue order.
#[get("/mempool/")]
pub async fn get_mempool(state: web::Data<AppState>) -> impl Responder {
    let transactions = state.ledger.mempool();
    HttpResponse::Ok().json(MempoolResponse {
        size: transactions.len(),
        transactions,
    })
}

/// Look a transaction up in the chain, then in the mempool.
#[get("/tx/{txid}/")]
pub async fn get_transaction(
    state: web::Data<AppState>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let txid = path.into_inner().0;
    match state.ledger.transaction(&txid) {
        Some((transaction, location)) => HttpResponse::Ok().json(TxLookupResponse {
            transaction,
            location,
        }),
        None => HttpResponse::NotFound().body(format!("unknown transaction {txid}")),
    }
}
