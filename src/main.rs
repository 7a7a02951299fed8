mod api;
mod blockchain;
mod config;
mod error;
mod miner;
mod storage;
mod transaction;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use api::AppState;
use blockchain::Ledger;
use config::Settings;
use miner::AutoMiner;
use storage::StateStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let settings = Settings::from_env();
    let params = settings.chain_params();

    let ledger = Arc::new(match &settings.data_file {
        Some(path) => Ledger::with_store(params, StateStore::new(path)),
        None => Ledger::new(params),
    });

    let auto_miner = settings.miner_address.as_ref().map(|address| {
        AutoMiner::new(ledger.clone(), address.clone()).spawn(settings.auto_mine_interval)
    });

    info!(
        "⛓️ Starting ledger API at http://{}:{} (difficulty {})",
        settings.host, settings.port, settings.difficulty
    );

    let state = web::Data::new(AppState::new(ledger));
    let result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await;

    if let Some(handle) = auto_miner {
        handle.shutdown();
    }
    result
}
