use actix_web::{HttpResponse, Responder, get, web};

use super::models::AppState;

/// Height, mempool size, supply, difficulty, reward and validity in one call.
#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.ledger.stats())
}
