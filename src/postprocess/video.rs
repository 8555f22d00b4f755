//! ffprobe/ffmpeg plumbing: stream probing, aspect-ratio repair, faststart
//! remux and A/V merging.
//!
//! Platforms hand out video with broken Sample Aspect Ratio metadata, and
//! some messenger clients render pixels raw, ignoring SAR. Metadata-only
//! fixes are not enough — the pixels have to be rescaled.

use crate::core::error::{AppError, AppResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FIX_TIMEOUT: Duration = Duration::from_secs(180);
const FASTSTART_TIMEOUT: Duration = Duration::from_secs(60);
const MERGE_TIMEOUT: Duration = Duration::from_secs(30);

/// First video stream as reported by ffprobe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub sar: String,
}

async fn run_checked(cmd: &mut Command, budget: Duration, what: &str) -> AppResult<Vec<u8>> {
    let output = timeout(budget, cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).output())
        .await
        .map_err(|_| AppError::Download(format!("{} timed out ({}s)", what, budget.as_secs())))??;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Download(format!("{} failed: {}", what, &stderr[..stderr.len().min(200)])));
    }
    Ok(output.stdout)
}

/// Probes `width, height, codec_name, sample_aspect_ratio` of the first
/// video stream, JSON-structured for reliable parsing.
pub async fn probe_video(path: &Path) -> AppResult<VideoProbe> {
    let stdout = run_checked(
        Command::new("ffprobe").args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,codec_name,sample_aspect_ratio",
            "-of",
            "json",
        ])
        .arg(path),
        PROBE_TIMEOUT,
        "ffprobe",
    )
    .await?;

    let data: serde_json::Value = serde_json::from_slice(&stdout)
        .map_err(|e| AppError::Download(format!("ffprobe JSON parse error: {}", e)))?;
    let stream = data["streams"]
        .as_array()
        .and_then(|s| s.first())
        .ok_or_else(|| AppError::Download("no video streams in probe output".to_string()))?;

    Ok(VideoProbe {
        width: stream["width"].as_u64().unwrap_or(0) as u32,
        height: stream["height"].as_u64().unwrap_or(0) as u32,
        codec: stream["codec_name"].as_str().unwrap_or("").to_string(),
        sar: stream["sample_aspect_ratio"].as_str().unwrap_or("1:1").to_string(),
    })
}

/// Final pixel dimensions, (0, 0) when the probe fails.
pub async fn probe_dimensions(path: &Path) -> (u32, u32) {
    match probe_video(path).await {
        Ok(probe) => (probe.width, probe.height),
        Err(e) => {
            log::warn!("[GET_DIMENSIONS] {}: {}", path.display(), e);
            (0, 0)
        }
    }
}

/// Integer duration in seconds, 0 when the probe fails.
pub async fn probe_duration(path: &Path) -> u64 {
    let result = run_checked(
        Command::new("ffprobe").args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path),
        PROBE_TIMEOUT,
        "ffprobe",
    )
    .await;

    match result {
        Ok(stdout) => serde_json::from_slice::<serde_json::Value>(&stdout)
            .ok()
            .and_then(|d| d["format"]["duration"].as_str().and_then(|s| s.parse::<f64>().ok()))
            .map(|d| d as u64)
            .unwrap_or(0),
        Err(e) => {
            log::warn!("[GET_DURATION] {}: {}", path.display(), e);
            0
        }
    }
}

/// SAR values that need no correction: square pixels or not reported.
pub fn sar_is_ok(sar: &str) -> bool {
    let normalized = sar.replace('/', ":");
    if matches!(normalized.as_str(), "1:1" | "N/A" | "") {
        return true;
    }
    // A zero component means the muxer had no idea; scaling by it would
    // produce a zero-width frame, so leave the file alone.
    match parse_sar(&normalized) {
        Some((num, den)) => num == 0 || den == 0,
        None => true,
    }
}

fn parse_sar(sar: &str) -> Option<(u32, u32)> {
    let normalized = sar.replace('/', ":");
    let mut parts = normalized.split(':');
    let num = parts.next()?.trim().parse().ok()?;
    let den = parts.next().map_or(Some(1), |p| p.trim().parse().ok())?;
    Some((num, den))
}

/// New pixel dimensions after burning the SAR into the frame: width scales
/// by the SAR rounded to nearest, height stays. H.264 wants even numbers on
/// both axes.
pub fn scaled_dimensions(width: u32, height: u32, sar: &str) -> (u32, u32) {
    let (new_width, new_height) = match parse_sar(sar) {
        Some((num, den)) if num > 0 && den > 0 => {
            let rounded = (width as u64 * num as u64 + den as u64 / 2) / den as u64;
            (rounded as u32, height)
        }
        _ => (width, height),
    };
    (new_width + new_width % 2, new_height + new_height % 2)
}

/// Normalizes the video for messenger playback, in place.
///
/// - h264 with square pixels: untouched
/// - wrong codec, SAR fine: re-encode to h264
/// - wrong SAR: rescale pixels to the displayed geometry and set SAR 1:1
///
/// Returns whether the file was rewritten.
pub async fn fix_video(path: &Path) -> AppResult<bool> {
    let probe = probe_video(path).await?;
    log::info!(
        "[FIX_VIDEO] {}x{}, codec={}, SAR={}",
        probe.width,
        probe.height,
        probe.codec,
        probe.sar
    );

    if probe.width == 0 || probe.height == 0 {
        return Err(AppError::Download(format!(
            "invalid video dimensions: {}x{}",
            probe.width, probe.height
        )));
    }

    let sar_ok = sar_is_ok(&probe.sar);
    if probe.codec == "h264" && sar_ok {
        log::info!("[FIX_VIDEO] SKIP - already OK");
        return Ok(false);
    }

    let fixed = path.with_extension("fixed.mp4");
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-i"]).arg(path);

    if sar_ok {
        log::info!("[FIX_VIDEO] RECODE: codec {} -> h264", probe.codec);
    } else {
        let (new_width, new_height) = scaled_dimensions(probe.width, probe.height, &probe.sar);
        log::info!(
            "[FIX_VIDEO] SCALE: {}x{} SAR={} -> {}x{} SAR=1:1",
            probe.width,
            probe.height,
            probe.sar,
            new_width,
            new_height
        );
        cmd.args(["-vf", &format!("scale={}:{},setsar=1:1", new_width, new_height)]);
    }

    cmd.args([
        "-c:v",
        "libx264",
        "-preset",
        "fast",
        "-crf",
        "20",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-movflags",
        "+faststart",
    ])
    .arg(&fixed);

    let result = run_checked(&mut cmd, FIX_TIMEOUT, "ffmpeg fix").await;
    match result {
        Ok(_) if fixed.exists() => {
            tokio::fs::remove_file(path).await?;
            tokio::fs::rename(&fixed, path).await?;
            let new_size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            log::info!("[FIX_VIDEO] SUCCESS: {} bytes", new_size);
            Ok(true)
        }
        Ok(_) => Err(AppError::Download("fixed file missing after encode".to_string())),
        Err(e) => {
            let _ = tokio::fs::remove_file(&fixed).await;
            Err(e)
        }
    }
}

/// Remuxes with the moov atom at the front of the container, in place.
/// Stream copy only — fast. `+genpts` smooths out broken PTS/DTS.
/// Without this the messenger shows no duration and no preview.
pub async fn ensure_faststart(path: &Path) -> AppResult<()> {
    let remuxed = path.with_extension("faststart.mp4");
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-fflags", "+genpts", "-i"])
        .arg(path)
        .args(["-map", "0", "-c", "copy", "-movflags", "+faststart"])
        .arg(&remuxed);

    match run_checked(&mut cmd, FASTSTART_TIMEOUT, "ffmpeg faststart").await {
        Ok(_) if remuxed.exists() => {
            tokio::fs::remove_file(path).await?;
            tokio::fs::rename(&remuxed, path).await?;
            log::info!("[FASTSTART] SUCCESS: {}", path.display());
            Ok(())
        }
        Ok(_) => Err(AppError::Download("remuxed file missing".to_string())),
        Err(e) => {
            let _ = tokio::fs::remove_file(&remuxed).await;
            Err(e)
        }
    }
}

/// Bitstream filter that stamps square-pixel SAR without re-encoding.
/// VP8/VP9 carry no SAR metadata the bsf could touch.
pub fn sar_bsf_for_codec(codec: &str) -> Option<&'static str> {
    let codec = codec.to_lowercase();
    if codec.contains("hevc") || codec.contains("h265") {
        Some("hevc_metadata=sample_aspect_ratio=1/1")
    } else if codec.contains("vp9") || codec.contains("vp8") {
        None
    } else {
        Some("h264_metadata=sample_aspect_ratio=1/1")
    }
}

/// Joins separate video and audio streams by stream copy.
///
/// DAR is left alone on purpose (`-aspect` would stretch 4:3 content);
/// only the SAR metadata is normalized via the codec-specific bsf.
pub async fn merge_av(video: &Path, audio: &Path, output: &Path) -> AppResult<()> {
    let codec = probe_video(video).await.map(|p| p.codec).unwrap_or_else(|e| {
        log::warn!("codec probe failed, assuming h264: {}", e);
        "h264".to_string()
    });

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"]);

    if let Some(bsf) = sar_bsf_for_codec(&codec) {
        cmd.args(["-bsf:v", bsf]);
    }
    cmd.args(["-movflags", "+faststart", "-shortest"]).arg(output);

    run_checked(&mut cmd, MERGE_TIMEOUT, "ffmpeg merge").await?;
    log::info!("[MERGE] {} + {} -> {}", video.display(), audio.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sar_ok_variants() {
        assert!(sar_is_ok("1:1"));
        assert!(sar_is_ok("1/1"));
        assert!(sar_is_ok("N/A"));
        assert!(sar_is_ok(""));
        assert!(sar_is_ok("0:1"));
        assert!(!sar_is_ok("9:10"));
        assert!(!sar_is_ok("9/10"));
    }

    #[test]
    fn test_scaled_dimensions_widens_frame() {
        // 1080x1920 with SAR 10:9 displays wider than it stores
        assert_eq!(scaled_dimensions(1080, 1920, "10:9"), (1200, 1920));
    }

    #[test]
    fn test_scaled_dimensions_forces_even() {
        let (w, h) = scaled_dimensions(101, 201, "1:1");
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
        assert_eq!((w, h), (102, 202));
    }

    #[test]
    fn test_scaled_dimensions_rounds_to_nearest() {
        // 101 * 3/2 = 151.5 -> 152 (already even)
        assert_eq!(scaled_dimensions(101, 200, "3:2"), (152, 200));
        // 100 * 9/10 = 90 exactly
        assert_eq!(scaled_dimensions(100, 200, "9:10"), (90, 200));
        // 107 * 9/10 = 96.3 -> 96
        assert_eq!(scaled_dimensions(107, 200, "9:10"), (96, 200));
    }

    #[test]
    fn test_scaled_dimensions_unparseable_sar_keeps_size() {
        assert_eq!(scaled_dimensions(100, 200, "whatever"), (100, 200));
    }

    #[test]
    fn test_bsf_selection() {
        assert_eq!(sar_bsf_for_codec("h264"), Some("h264_metadata=sample_aspect_ratio=1/1"));
        assert_eq!(sar_bsf_for_codec("avc1"), Some("h264_metadata=sample_aspect_ratio=1/1"));
        assert_eq!(sar_bsf_for_codec("hevc"), Some("hevc_metadata=sample_aspect_ratio=1/1"));
        assert_eq!(sar_bsf_for_codec("vp9"), None);
        assert_eq!(sar_bsf_for_codec("vp8"), None);
    }
}
