use actix_web::{HttpResponse, Responder, get, post, web};
use log::info;

use crate::blockchain::Block;

use super::models::{AppState, AppendBlockResponse, BlocksQuery, BlocksResponse, ValidateResponse};

const DEFAULT_BLOCKS: usize = 10;
const MAX_BLOCKS: usize = 100;

/// Most recent blocks, newest first.
#[get("/blocks/")]
pub async fn get_blocks(
    state: web::Data<AppState>,
    query: web::Query<BlocksQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_BLOCKS).min(MAX_BLOCKS);
    let (height, blocks): (u64, Vec<Block>) = state
        .ledger
        .read(|bc| (bc.height(), bc.recent_blocks(limit).into_iter().cloned().collect()));
    HttpResponse::Ok().json(BlocksResponse { height, blocks })
}

/// A single block by index.
#[get("/blocks/{index}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<(u64,)>) -> impl Responder {
    let index = path.into_inner().0;
    match state.ledger.block(index) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body(format!("no block at index {index}")),
    }
}

/// A single block by header hash.
#[get("/blocks/hash/{hash}/")]
pub async fn get_block_by_hash(
    state: web::Data<AppState>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let hash = path.into_inner().0;
    match state.ledger.block_by_hash(&hash) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body(format!("no block with hash {hash}")),
    }
}

/// Append a block mined elsewhere on top of the current tip.
#[post("/blocks/")]
pub async fn post_block(state: web::Data<AppState>, body: web::Json<Block>) -> impl Responder {
    let block = body.into_inner();
    let index = block.index;
    let appended = state.ledger.append_block(block);
    let height = state.ledger.read(|bc| bc.height());
    let resp = AppendBlockResponse { appended, height };
    if appended {
        info!("POST /blocks/ - appended block #{index}");
        HttpResponse::Ok().json(resp)
    } else {
        HttpResponse::BadRequest().json(resp)
    }
}

/// Validate the whole chain.
#[get("/validate/")]
pub async fn validate_chain(state: web::Data<AppState>) -> impl Responder {
    let resp = state.ledger.read(|bc| ValidateResponse {
        valid: bc.is_chain_valid(),
        length: bc.len(),
        difficulty: bc.difficulty(),
    });
    HttpResponse::Ok().json(resp)
}
