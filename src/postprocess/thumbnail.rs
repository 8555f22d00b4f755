//! Thumbnail preparation for uploads.
//!
//! Telegram wants a JPEG at most ~320 px on the long edge. Platform
//! thumbnails get downscaled; vertical videos without one get a frame grab
//! instead (platforms tend to serve a horizontal placeholder for those).

use crate::core::utils::{cleanup_files, unique_download_path};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

async fn run_ffmpeg(cmd: &mut Command) -> bool {
    match timeout(FFMPEG_TIMEOUT, cmd.stdout(Stdio::null()).stderr(Stdio::piped()).output()).await {
        Ok(Ok(output)) if output.status.success() => true,
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("[THUMBNAIL] ffmpeg failed: {}", &stderr[..stderr.len().min(100)]);
            false
        }
        Ok(Err(e)) => {
            log::warn!("[THUMBNAIL] ffmpeg spawn error: {}", e);
            false
        }
        Err(_) => {
            log::warn!("[THUMBNAIL] ffmpeg timed out");
            false
        }
    }
}

/// Fetches a platform thumbnail and downscales it for the upload call.
/// Returns None on any failure — a missing preview is not worth a retry.
pub async fn prepare_from_url(http: &reqwest::Client, thumbnail_url: &str) -> Option<PathBuf> {
    let raw = unique_download_path("raw.jpg");
    let output = unique_download_path("jpg");

    log::info!(
        "[THUMBNAIL] Downloading: {}",
        thumbnail_url.chars().take(80).collect::<String>()
    );
    let fetch = async {
        let response = http.get(thumbnail_url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        tokio::fs::write(&raw, &bytes).await.ok()?;
        Some(())
    };
    if timeout(FETCH_TIMEOUT, fetch).await.ok().flatten().is_none() {
        log::warn!("[THUMBNAIL] Download failed");
        cleanup_files([&raw]);
        return None;
    }

    // Do not upscale small sources; -2 keeps the height even
    let ok = run_ffmpeg(
        Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(&raw)
            .args(["-vf", "scale='min(320,iw)':-2", "-q:v", "5"])
            .arg(&output),
    )
    .await;

    cleanup_files([&raw]);
    if ok && output.exists() {
        log::info!("[THUMBNAIL] SUCCESS: {}", output.display());
        Some(output)
    } else {
        cleanup_files([&output]);
        None
    }
}

/// Grabs a frame from the video itself and fits it into 320x320.
pub async fn generate_from_video(video: &Path, at_secs: f64) -> Option<PathBuf> {
    if !video.exists() {
        return None;
    }
    let output = unique_download_path("jpg");

    let ok = run_ffmpeg(
        Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-loglevel", "error", "-ss", &at_secs.to_string(), "-i"])
            .arg(video)
            .args([
                "-vframes",
                "1",
                "-vf",
                "scale='min(320,iw)':'min(320,ih)':force_original_aspect_ratio=decrease",
                "-q:v",
                "5",
            ])
            .arg(&output),
    )
    .await;

    if ok && output.exists() {
        log::info!("[THUMBNAIL] Generated from video: {}", output.display());
        Some(output)
    } else {
        cleanup_files([&output]);
        None
    }
}
