//! Post-processing of downloaded files before delivery.
//!
//! Order matters: aspect-ratio fix first (may re-encode), then the
//! faststart remux, then the final probe whose dimensions accompany the
//! upload. Every step is best-effort — a failure logs and leaves the file
//! as it was, because a slightly off video still beats no video.

pub mod audio;
pub mod thumbnail;
pub mod video;

use crate::storage::SlotController;
use std::path::{Path, PathBuf};

/// Final shape of a processed video, handed to the upload call.
#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub width: u32,
    pub height: u32,
    pub duration_secs: u64,
    pub thumbnail: Option<PathBuf>,
}

/// Runs the full video pipeline in place: fix -> faststart -> probe ->
/// thumbnail. The ffmpeg slot wraps the transcode-capable steps.
pub async fn run_video(
    slots: &SlotController,
    http: &reqwest::Client,
    file: &Path,
    thumbnail_url: Option<&str>,
) -> Processed {
    // Thumbnail preparation shells out to ffmpeg too, so the slot stays
    // held until after it
    let slot_taken = slots.acquire_ffmpeg().await;

    match video::fix_video(file).await {
        Ok(true) => log::info!("[POSTPROCESS] aspect fix applied to {}", file.display()),
        Ok(false) => {}
        Err(e) => log::warn!("[POSTPROCESS] aspect fix failed (keeping original): {}", e),
    }

    if let Err(e) = video::ensure_faststart(file).await {
        log::warn!("[POSTPROCESS] faststart failed (keeping original): {}", e);
    }

    let (width, height) = video::probe_dimensions(file).await;
    let duration_secs = video::probe_duration(file).await;

    let thumbnail = match thumbnail_url {
        Some(url) => thumbnail::prepare_from_url(http, url).await,
        None if height > width && height > 0 => thumbnail::generate_from_video(file, 1.0).await,
        None => None,
    };

    if slot_taken {
        slots.release_ffmpeg().await;
    }

    Processed { width, height, duration_secs, thumbnail }
}
