use saveninja::core::{config, logging, system_metrics};
use saveninja::download::ChainExecutor;
use saveninja::gate::FlyerGate;
use saveninja::providers::ProviderRegistry;
use saveninja::routing::RoutingEngine;
use saveninja::storage::{ArtifactCache, Kv, SlotController, Telemetry};
use saveninja::telegram::{handle_message, AppState};
use std::sync::Arc;
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logger();
    logging::log_startup_configuration();

    std::fs::create_dir_all(&*config::DOWNLOAD_DIR)?;

    let kv = Kv::connect(&config::REDIS_URL).await?;
    let telemetry = Telemetry::connect(&config::DATABASE_URL).await?;

    let _metrics_task = system_metrics::spawn(kv.clone());

    let state = Arc::new(AppState {
        cache: ArtifactCache::new(kv.clone()),
        slots: SlotController::new(kv.clone()),
        routing: RoutingEngine::new(kv),
        gate: FlyerGate::new(telemetry.clone()),
        telemetry,
        executor: ChainExecutor::new(ProviderRegistry::standard()),
        http: reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?,
    });

    let bot = Bot::new(config::BOT_TOKEN.clone());
    log::info!("🥷 SaveNinja is up");

    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let state = Arc::clone(&state);
        async move { handle_message(bot, msg, state).await }
    })
    .await;

    Ok(())
}
