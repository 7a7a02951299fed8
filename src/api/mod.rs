mod balance;
mod chain;
mod health;
mod mining;
pub mod models;
mod stats;
mod tx;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(stats::get_stats)
            .service(chain::get_blocks)
            .service(chain::get_block)
            .service(chain::get_block_by_hash)
            .service(chain::post_block)
            .service(chain::validate_chain)
            .service(tx::post_transaction)
            .service(tx::get_mempool)
            .service(tx::get_transaction)
            .service(balance::get_balance)
            .service(mining::mine_block),
    );
}
