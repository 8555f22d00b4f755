//! Audio extraction: MP3 320 kbps out of any downloaded container.

use crate::core::error::{AppError, AppResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);
const BITRATE: &str = "320k";

/// Re-encodes the audio track of `input` into an MP3 at `output`.
pub async fn extract_mp3(input: &Path, output: &Path) -> AppResult<()> {
    if !input.exists() {
        return Err(AppError::Download("source file not found for audio extraction".to_string()));
    }

    let result = timeout(
        EXTRACT_TIMEOUT,
        Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", "libmp3lame", "-b:a", BITRATE, "-ar", "44100"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| AppError::Download(format!("audio extraction timed out ({}s)", EXTRACT_TIMEOUT.as_secs())))??;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(AppError::Download(format!(
            "audio extraction failed: {}",
            &stderr[..stderr.len().min(200)]
        )));
    }
    if !output.exists() {
        return Err(AppError::Download("mp3 missing after extraction".to_string()));
    }
    Ok(())
}
