//! Logging initialization and startup diagnostics.

use crate::core::config;

/// Initialize the logger. Level comes from RUST_LOG, defaulting to info.
pub fn init_logger() {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY-free path: set via the env_logger builder instead of set_var
        pretty_env_logger::formatted_timed_builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        pretty_env_logger::init_timed();
    }
}

/// Logs the effective configuration at startup so a misconfigured deploy is
/// visible in the first screen of output.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("SaveNinja configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("download dir : {}", &*config::DOWNLOAD_DIR);
    log::info!("redis        : {}", &*config::REDIS_URL);
    log::info!(
        "postgres     : {}",
        if config::DATABASE_URL.is_empty() { "NOT SET (telemetry disabled)" } else { "configured" }
    );
    log::info!("yt-dlp       : {}", &*config::YTDL_BIN);

    if config::RAPIDAPI_KEY.is_empty() {
        log::warn!("⚠️  RAPIDAPI_KEY not set — rapidapi/savenow providers will fail");
    } else {
        log::info!("rapidapi     : key configured, host={}", &*config::RAPIDAPI_HOST);
    }

    if config::FLYER_API_KEY.is_empty() {
        log::warn!("⚠️  FLYER_API_KEY not set — subscription gate disabled");
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
