use actix_web::{HttpResponse, Responder, post, web};
use log::{debug, error, info};
use std::ops::ControlFlow;

use super::models::{AppState, MineRequest, MineResponse};
use crate::blockchain::MiningProgress;
use crate::transaction::is_valid_address;

/// Mine the next block from the mempool.
///
/// The nonce search runs on the blocking thread pool; the response is sent
/// once it completes. `mined: false` means there was nothing to mine or a
/// miner was already running.
#[post("/mine/")]
pub async fn mine_block(state: web::Data<AppState>, req: web::Json<MineRequest>) -> impl Responder {
    let miner_address = req.miner_address.trim().to_string();
    if miner_address.is_empty() {
        return HttpResponse::BadRequest().body("miner_address required");
    }
    if !is_valid_address(&miner_address) {
        return HttpResponse::BadRequest()
            .body(format!("invalid miner_address {miner_address:?}"));
    }
    let force = req.force;

    let ledger = state.ledger.clone();
    let result = web::block(move || {
        let mut log_progress = |p: &MiningProgress| {
            debug!(
                "MINER - nonce={} rate={:.0} H/s hash={} target={}",
                p.nonce, p.hash_rate, p.hash, p.target
            );
            ControlFlow::Continue(())
        };
        ledger.mine_next(&miner_address, Some(&mut log_progress), force)
    })
    .await;

    match result {
        Ok(Some(block)) => {
            info!(
                "MINER - sealed block #{} (hash={}, nonce={})",
                block.index, block.hash, block.nonce
            );
            HttpResponse::Ok().json(MineResponse {
                mined: true,
                block: Some(block),
            })
        }
        Ok(None) => HttpResponse::Ok().json(MineResponse {
            mined: false,
            block: None,
        }),
        Err(e) => {
            error!("MINER - mining task failed: {e}");
            HttpResponse::InternalServerError().body("mining task failed")
        }
    }
}
