//! yt-dlp subprocess provider.
//!
//! Primary provider for YouTube, TikTok and Pinterest. Metadata comes from a
//! `--dump-json` probe, the file from a second invocation with `--newline`
//! progress parsing. Pinterest links that turn out to be photo pins fall
//! back to an og:image page scrape.

use crate::core::config;
use crate::core::utils::{sanitize_filename, unique_download_path};
use crate::providers::{DownloadOpts, Downloaded, MediaInfo, MediaProbe, Payload, Provider, ProgressUpdate};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const INFO_TIMEOUT: Duration = Duration::from_secs(20);

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// `[download]  45.2% of    9.12MiB at    2.35MiB/s ETA 00:05`
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*([\d.]+)(KiB|MiB|GiB)(?:\s+at\s+([\d.]+)(KiB|MiB|GiB)/s)?")
        .unwrap()
});

static OG_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<meta[^>]*property="og:image"[^>]*content="([^"]+)""#).unwrap());

pub struct YtdlpProvider {
    http: reqwest::Client,
}

fn unit_to_bytes(value: f64, unit: &str) -> u64 {
    let mult = match unit {
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    (value * mult) as u64
}

/// Parses one yt-dlp `--newline` progress line.
pub fn parse_progress(line: &str) -> Option<ProgressUpdate> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total = unit_to_bytes(caps.get(2)?.as_str().parse().ok()?, caps.get(3)?.as_str());
    let speed = match (caps.get(4), caps.get(5)) {
        (Some(v), Some(u)) => v.as_str().parse().ok().map(|f| unit_to_bytes(f, u.as_str())),
        _ => None,
    };
    Some(ProgressUpdate {
        downloaded_bytes: (total as f64 * percent / 100.0) as u64,
        total_bytes: Some(total),
        speed_bytes_per_sec: speed,
    })
}

/// Format selector tuned per platform.
///
/// TikTok prefers H.264 to avoid the SAR mess, full YouTube caps at 720p to
/// keep files under the document ceiling, Pinterest takes anything playable.
fn format_string(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    let is_youtube = lower.contains("youtube.com") || lower.contains("youtu.be");
    if lower.contains("tiktok") {
        "best[ext=mp4][vcodec^=avc]/best[ext=mp4][vcodec^=h264]/best[ext=mp4]/best"
    } else if is_youtube && !lower.contains("/shorts/") {
        "best[height<=720][ext=mp4]/best[height<=720]/best[ext=mp4]/best"
    } else if lower.contains("pinterest") || lower.contains("pin.it") {
        "best[ext=mp4]/best[ext=webm]/bestvideo+bestaudio/best"
    } else {
        "best[ext=mp4]/best"
    }
}

fn media_info_from_json(info: &serde_json::Value) -> MediaInfo {
    let author = info["uploader"]
        .as_str()
        .or_else(|| info["channel"].as_str())
        .or_else(|| info["creator"].as_str())
        .unwrap_or("unknown");
    MediaInfo {
        title: info["title"].as_str().unwrap_or("video").chars().take(100).collect(),
        author: author.to_string(),
        duration_secs: info["duration"].as_f64().unwrap_or(0.0) as u64,
        thumbnail_url: info["thumbnail"].as_str().map(str::to_string),
        platform: info["extractor"].as_str().unwrap_or("unknown").to_string(),
    }
}

/// yt-dlp may switch the container; check the siblings of the expected path.
fn find_downloaded_file(expected: &Path) -> Option<PathBuf> {
    if expected.exists() {
        return Some(expected.to_path_buf());
    }
    let stem = expected.with_extension("");
    for ext in ["mp4", "webm", "mkv", "mp3"] {
        let candidate = stem.with_extension(ext);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

impl YtdlpProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent(BROWSER_UA)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn dump_json(&self, url: &str, budget: Duration) -> Result<serde_json::Value, String> {
        let output = timeout(
            budget,
            Command::new(&*config::YTDL_BIN)
                .args([
                    "--dump-json",
                    "--no-playlist",
                    "--skip-download",
                    "--no-warnings",
                    "--socket-timeout",
                    "10",
                    "--retries",
                    "2",
                    "--no-check-certificate",
                    url,
                ])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| format!("yt-dlp info timed out ({}s)", budget.as_secs()))?
        .map_err(|e| format!("failed to spawn yt-dlp: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(tail(&stderr, 400));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| format!("yt-dlp info parse error: {}", e))
    }

    async fn run_download(&self, url: &str, output_path: &Path, opts: &DownloadOpts) -> Result<(), String> {
        let budget = opts.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        let output_arg = output_path.display().to_string();
        let format_arg = format_string(url);

        let mut child = Command::new(&*config::YTDL_BIN)
            .args([
                "-o",
                &output_arg,
                "--newline",
                "--no-playlist",
                "--force-overwrites",
                "--format",
                format_arg,
                "--merge-output-format",
                "mp4",
                "--socket-timeout",
                "10",
                "--retries",
                "2",
                "--fragment-retries",
                "2",
                "--concurrent-fragments",
                "5",
                "--no-check-certificate",
                "--geo-bypass",
                "--impersonate",
                "chrome",
                "--extractor-args",
                "youtube:player_client=ios,android",
                "--postprocessor-args",
                "Merger:-movflags +faststart",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn yt-dlp: {}", e))?;

        // stderr tail for error reporting; progress shows up on both streams
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail_lines: Vec<String> = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("yt-dlp stderr: {}", line);
                    tail_lines.push(line);
                    if tail_lines.len() > 50 {
                        tail_lines.remove(0);
                    }
                }
                tail_lines.join("\n")
            })
        });

        let stdout = child.stdout.take();
        let opts_progress = opts.clone();
        let stdout_task = stdout.map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(update) = parse_progress(&line) {
                        opts_progress.report(update);
                    }
                }
            })
        });

        let status = timeout(budget, child.wait())
            .await
            .map_err(|_| format!("download timed out ({}s)", budget.as_secs()))?
            .map_err(|e| format!("yt-dlp process failed: {}", e))?;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            Err(if stderr_text.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                tail(&stderr_text, 500)
            })
        }
    }

    /// Photo pins: scrape og:image from the pin page and fetch it directly.
    async fn download_photo(&self, url: &str) -> Result<Payload, String> {
        let page = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("pinterest page fetch failed: {}", e))?
            .text()
            .await
            .map_err(|e| format!("pinterest page read failed: {}", e))?;

        let mut image_url = OG_IMAGE_RE
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| "no image found on pin page".to_string())?;

        // 736x is a preview rendition; originals carries full resolution
        if image_url.contains("/736x/") {
            let original = image_url.replace("/736x/", "/originals/");
            if let Ok(head) = self.http.head(&original).send().await {
                if head.status().is_success() {
                    image_url = original;
                }
            }
        }

        let response = self
            .http
            .get(&image_url)
            .send()
            .await
            .map_err(|e| format!("image fetch failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("image fetch failed: HTTP {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let ext = if content_type.contains("png") || image_url.ends_with(".png") {
            "png"
        } else if content_type.contains("webp") || image_url.ends_with(".webp") {
            "webp"
        } else {
            "jpg"
        };

        let host = url::Url::parse(&image_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let bytes = response.bytes().await.map_err(|e| format!("image read failed: {}", e))?;
        let path = unique_download_path(ext);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| format!("image write failed: {}", e))?;

        Ok(Payload::Single(Downloaded {
            filename: format!("photo.{}", ext),
            file_size: bytes.len() as u64,
            file_path: path,
            is_photo: true,
            info: MediaInfo { title: "photo".into(), platform: "pinterest".into(), ..Default::default() },
            quota: None,
            prep_ms: None,
            download_ms: None,
            download_host: host,
        }))
    }
}

impl Default for YtdlpProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.trim().to_string();
    }
    let start = s.len() - max;
    let mut idx = start;
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    s[idx..].trim().to_string()
}

#[async_trait]
impl Provider for YtdlpProvider {
    fn name(&self) -> &'static str {
        "ytdlp"
    }

    async fn download(&self, url: &str, opts: &DownloadOpts) -> Result<Payload, String> {
        let started = Instant::now();
        let info = match self.dump_json(url, opts.connect_timeout.unwrap_or(INFO_TIMEOUT).max(INFO_TIMEOUT)).await {
            Ok(json) => media_info_from_json(&json),
            Err(e) => {
                let lower = e.to_lowercase();
                let is_pinterest = url.contains("pinterest") || url.contains("pin.it");
                if is_pinterest && (lower.contains("no video") || lower.contains("video formats")) {
                    log::info!("Pinterest video not found, trying photo: {}", url);
                    return self.download_photo(url).await;
                }
                return Err(e);
            }
        };
        let prep_ms = started.elapsed().as_millis() as u64;

        let output_path = unique_download_path("mp4");
        let download_started = Instant::now();
        if let Err(e) = self.run_download(url, &output_path, opts).await {
            let lower = e.to_lowercase();
            let is_pinterest = url.contains("pinterest") || url.contains("pin.it");
            if is_pinterest && (lower.contains("no video") || lower.contains("video formats")) {
                log::info!("Pinterest video not found, trying photo: {}", url);
                return self.download_photo(url).await;
            }
            return Err(e);
        }
        let download_ms = download_started.elapsed().as_millis() as u64;

        let actual = find_downloaded_file(&output_path).ok_or_else(|| "file not found after download".to_string())?;
        let file_size = tokio::fs::metadata(&actual)
            .await
            .map_err(|e| format!("downloaded file metadata error: {}", e))?
            .len();

        log::info!(
            "✅ ytdlp downloaded {} ({:.2} MB in {} ms)",
            actual.display(),
            file_size as f64 / (1024.0 * 1024.0),
            download_ms
        );

        Ok(Payload::Single(Downloaded {
            filename: sanitize_filename(&info.title, "mp4"),
            file_path: actual,
            file_size,
            is_photo: false,
            info,
            quota: None,
            prep_ms: Some(prep_ms),
            download_ms: Some(download_ms),
            download_host: None,
        }))
    }

    async fn get_info(&self, url: &str) -> Option<MediaProbe> {
        let json = self.dump_json(url, INFO_TIMEOUT).await.ok()?;
        let info = media_info_from_json(&json);
        Some(MediaProbe {
            title: info.title,
            duration_secs: info.duration_secs,
            thumbnail_url: info.thumbnail_url,
        })
    }

    async fn download_audio(&self, url: &str, opts: &DownloadOpts) -> Result<Downloaded, String> {
        let budget = opts.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        let output_path = unique_download_path("mp3");
        let template = output_path.with_extension("").display().to_string();

        let output = timeout(
            budget,
            Command::new(&*config::YTDL_BIN)
                .args([
                    "-o",
                    &format!("{}.%(ext)s", template),
                    "--no-playlist",
                    "-x",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "320K",
                    "--socket-timeout",
                    "10",
                    "--no-check-certificate",
                    "--geo-bypass",
                    url,
                ])
                .output(),
        )
        .await
        .map_err(|_| format!("audio download timed out ({}s)", budget.as_secs()))?
        .map_err(|e| format!("failed to spawn yt-dlp: {}", e))?;

        if !output.status.success() {
            return Err(tail(&String::from_utf8_lossy(&output.stderr), 400));
        }

        let actual = find_downloaded_file(&output_path).ok_or_else(|| "audio file not found".to_string())?;
        let file_size = tokio::fs::metadata(&actual)
            .await
            .map_err(|e| format!("audio file metadata error: {}", e))?
            .len();

        Ok(Downloaded {
            filename: "audio.mp3".to_string(),
            file_path: actual,
            file_size,
            is_photo: false,
            info: MediaInfo::default(),
            quota: None,
            prep_ms: None,
            download_ms: None,
            download_host: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_progress_full_line() {
        let update = parse_progress("[download]  45.2% of    9.12MiB at    2.35MiB/s ETA 00:05").unwrap();
        assert_eq!(update.total_bytes, Some((9.12 * 1024.0 * 1024.0) as u64));
        assert_eq!(update.speed_bytes_per_sec, Some((2.35 * 1024.0 * 1024.0) as u64));
        let expected = ((9.12 * 1024.0 * 1024.0) as u64 as f64 * 45.2 / 100.0) as u64;
        assert_eq!(update.downloaded_bytes, expected);
    }

    #[test]
    fn test_parse_progress_estimated_total() {
        let update = parse_progress("[download]   5.0% of ~ 120.00MiB at  512.00KiB/s ETA 03:11").unwrap();
        assert_eq!(update.total_bytes, Some(120 * 1024 * 1024));
    }

    #[test]
    fn test_parse_progress_rejects_noise() {
        assert!(parse_progress("[youtube] abc123: Downloading webpage").is_none());
        assert!(parse_progress("[download] Destination: /tmp/downloads/a.mp4").is_none());
    }

    #[test]
    fn test_format_string_per_platform() {
        assert!(format_string("https://www.tiktok.com/@u/video/1").contains("vcodec^=avc"));
        assert!(format_string("https://youtube.com/watch?v=a").contains("height<=720"));
        assert!(!format_string("https://youtube.com/shorts/a").contains("height<=720"));
        assert!(format_string("https://pin.it/x").contains("webm"));
    }

    #[test]
    fn test_find_downloaded_file_alternate_ext() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("clip.mp4");
        std::fs::write(dir.path().join("clip.webm"), b"x").unwrap();
        let found = find_downloaded_file(&expected).unwrap();
        assert_eq!(found.extension().unwrap(), "webm");
    }

    #[test]
    fn test_media_info_from_json_fallbacks() {
        let json = serde_json::json!({
            "title": "Test", "channel": "Chan", "duration": 42.7, "extractor": "youtube"
        });
        let info = media_info_from_json(&json);
        assert_eq!(info.author, "Chan");
        assert_eq!(info.duration_secs, 42);
        assert_eq!(info.thumbnail_url, None);
    }

    #[test]
    fn test_tail_keeps_char_boundary() {
        let s = format!("{}привет", "x".repeat(500));
        // 512 bytes total; cutting 10 bytes back lands mid-char and must
        // shift forward to the next boundary
        assert_eq!(tail(&s, 10), "ривет");
        assert_eq!(tail("short", 400), "short");
    }
}
