//! SaveNinja — Telegram bot for downloading media from TikTok, Instagram,
//! YouTube and Pinterest.
//!
//! The interesting part is the download orchestrator: dynamic provider
//! routing with operator overrides, a fallback chain with error
//! classification and retry, Redis-backed concurrency slots, an ffmpeg
//! post-processing pipeline and delivery with retry against a transport
//! that drops large transfers.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, system metrics
//! - `intake`: URL extraction, short-link resolution, classification
//! - `routing`: per-source provider chains from Redis with defaults
//! - `providers`: uniform adapters over the external downloaders
//! - `download`: chain executor and progress updater
//! - `postprocess`: ffmpeg/ffprobe pipeline (aspect fix, faststart, thumbs)
//! - `storage`: Redis (cache, slots) and PostgreSQL (telemetry)
//! - `gate`: FlyerService subscription gate
//! - `telegram`: message handling and delivery

pub mod core;
pub mod download;
pub mod gate;
pub mod intake;
pub mod postprocess;
pub mod providers;
pub mod routing;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult};
pub use download::ChainExecutor;
pub use providers::ProviderRegistry;
pub use telegram::{handle_message, AppState};
