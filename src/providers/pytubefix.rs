//! Secondary YouTube provider speaking the Innertube player API directly.
//!
//! The ANDROID client receives plain stream URLs (no signature ciphering),
//! which makes it a cheap fallback when yt-dlp is blocked, and a fast
//! metadata probe for the shorts/full duration preflight.

use crate::core::utils::{sanitize_filename, unique_download_path};
use crate::postprocess;
use crate::providers::{
    fetch_to_file, DownloadOpts, Downloaded, MediaInfo, MediaProbe, Payload, Provider,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player";
const ANDROID_CLIENT_VERSION: &str = "19.09.37";
const ANDROID_UA: &str = "com.google.android.youtube/19.09.37 (Linux; U; Android 11) gzip";
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const INFO_TIMEOUT: Duration = Duration::from_secs(8);

static VIDEO_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})").unwrap());

pub struct PytubeProvider {
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
struct StreamFormat {
    url: String,
    mime_type: String,
    height: u64,
    bitrate: u64,
}

fn extract_video_id(url: &str) -> Option<&str> {
    VIDEO_ID_RE.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn parse_formats(list: Option<&Vec<serde_json::Value>>) -> Vec<StreamFormat> {
    list.map(|formats| {
        formats
            .iter()
            .filter_map(|f| {
                Some(StreamFormat {
                    url: f["url"].as_str()?.to_string(),
                    mime_type: f["mimeType"].as_str().unwrap_or("").to_string(),
                    height: f["height"].as_u64().unwrap_or(0),
                    bitrate: f["bitrate"].as_u64().unwrap_or(0),
                })
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Best progressive mp4 at or under 720p (falls back to the smallest one
/// above when nothing fits).
fn pick_progressive(formats: &[StreamFormat]) -> Option<&StreamFormat> {
    let mp4: Vec<&StreamFormat> = formats
        .iter()
        .filter(|f| f.mime_type.starts_with("video/mp4") && !f.url.is_empty())
        .collect();
    mp4.iter()
        .filter(|f| f.height <= 720)
        .max_by_key(|f| f.height)
        .or_else(|| mp4.iter().min_by_key(|f| f.height))
        .copied()
}

fn pick_adaptive_video(formats: &[StreamFormat]) -> Option<&StreamFormat> {
    formats
        .iter()
        .filter(|f| f.mime_type.starts_with("video/mp4") && f.mime_type.contains("avc1") && f.height <= 720)
        .max_by_key(|f| f.height)
}

fn pick_adaptive_audio(formats: &[StreamFormat]) -> Option<&StreamFormat> {
    formats
        .iter()
        .filter(|f| f.mime_type.starts_with("audio/mp4"))
        .max_by_key(|f| f.bitrate)
}

impl PytubeProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent(ANDROID_UA)
                .timeout(Duration::from_secs(1200))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn player_response(&self, video_id: &str, budget: Duration) -> Result<serde_json::Value, String> {
        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": ANDROID_CLIENT_VERSION,
                    "androidSdkVersion": 30,
                    "hl": "en"
                }
            }
        });

        let response = timeout(
            budget,
            self.http
                .post(PLAYER_URL)
                .header("X-YouTube-Client-Name", "3")
                .header("X-YouTube-Client-Version", ANDROID_CLIENT_VERSION)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| format!("player request timed out ({}s)", budget.as_secs()))?
        .map_err(|e| format!("player request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("player request failed: HTTP {}", response.status()));
        }
        let data: serde_json::Value = response.json().await.map_err(|e| format!("player parse error: {}", e))?;

        let status = data["playabilityStatus"]["status"].as_str().unwrap_or("OK");
        if status != "OK" {
            let reason = data["playabilityStatus"]["reason"].as_str().unwrap_or(status);
            return Err(format!("video not playable: {}", reason));
        }
        Ok(data)
    }

    fn media_info(data: &serde_json::Value) -> MediaInfo {
        let details = &data["videoDetails"];
        let thumbnail_url = details["thumbnail"]["thumbnails"]
            .as_array()
            .and_then(|t| t.last())
            .and_then(|t| t["url"].as_str())
            .map(str::to_string);
        MediaInfo {
            title: details["title"].as_str().unwrap_or("video").chars().take(100).collect(),
            author: details["author"].as_str().unwrap_or("unknown").to_string(),
            duration_secs: details["lengthSeconds"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            thumbnail_url,
            platform: "youtube".to_string(),
        }
    }
}

impl Default for PytubeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for PytubeProvider {
    fn name(&self) -> &'static str {
        "pytubefix"
    }

    async fn download(&self, url: &str, opts: &DownloadOpts) -> Result<Payload, String> {
        let video_id = extract_video_id(url).ok_or_else(|| format!("cannot extract video id from {}", url))?;
        let budget = opts.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        let started = Instant::now();

        let data = self
            .player_response(video_id, opts.connect_timeout.unwrap_or(INFO_TIMEOUT).max(INFO_TIMEOUT))
            .await?;
        let info = Self::media_info(&data);
        let prep_ms = started.elapsed().as_millis() as u64;

        let progressive = parse_formats(data["streamingData"]["formats"].as_array());
        let adaptive = parse_formats(data["streamingData"]["adaptiveFormats"].as_array());

        let output = unique_download_path("mp4");
        let download_started = Instant::now();

        let work = async {
            if let Some(format) = pick_progressive(&progressive) {
                log::info!("[PYTUBEFIX] progressive {}p for {}", format.height, video_id);
                let (size, host) = fetch_to_file(&self.http, &format.url, &output, opts).await?;
                return Ok::<(u64, Option<String>, std::path::PathBuf), String>((size, host, output.clone()));
            }

            // No progressive stream: pull video+audio separately and merge
            let video = pick_adaptive_video(&adaptive).ok_or_else(|| "no mp4 video stream available".to_string())?;
            let audio = pick_adaptive_audio(&adaptive).ok_or_else(|| "no mp4 audio stream available".to_string())?;
            log::info!("[PYTUBEFIX] adaptive {}p + audio for {}", video.height, video_id);

            let video_path = unique_download_path("video.mp4");
            let audio_path = unique_download_path("m4a");
            let result = async {
                let (_, host) = fetch_to_file(&self.http, &video.url, &video_path, opts).await?;
                fetch_to_file(&self.http, &audio.url, &audio_path, opts).await?;
                postprocess::video::merge_av(&video_path, &audio_path, &output)
                    .await
                    .map_err(|e| format!("merge failed: {}", e))?;
                let size = tokio::fs::metadata(&output)
                    .await
                    .map_err(|e| format!("merged file metadata error: {}", e))?
                    .len();
                Ok::<(u64, Option<String>, std::path::PathBuf), String>((size, host, output.clone()))
            }
            .await;
            crate::core::utils::cleanup_files([&video_path, &audio_path]);
            result
        };

        let (file_size, host, path) = timeout(budget, work)
            .await
            .map_err(|_| format!("download timed out ({}s)", budget.as_secs()))??;
        let download_ms = download_started.elapsed().as_millis() as u64;

        Ok(Payload::Single(Downloaded {
            filename: sanitize_filename(&info.title, "mp4"),
            file_path: path,
            file_size,
            is_photo: false,
            info,
            quota: None,
            prep_ms: Some(prep_ms),
            download_ms: Some(download_ms),
            download_host: host,
        }))
    }

    async fn get_info(&self, url: &str) -> Option<MediaProbe> {
        let video_id = extract_video_id(url)?;
        let data = self.player_response(video_id, INFO_TIMEOUT).await.ok()?;
        let info = Self::media_info(&data);
        Some(MediaProbe {
            title: info.title,
            duration_secs: info.duration_secs,
            thumbnail_url: info.thumbnail_url,
        })
    }

    async fn download_audio(&self, url: &str, opts: &DownloadOpts) -> Result<Downloaded, String> {
        let video_id = extract_video_id(url).ok_or_else(|| format!("cannot extract video id from {}", url))?;
        let budget = opts.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let data = self.player_response(video_id, INFO_TIMEOUT).await?;
        let info = Self::media_info(&data);
        let adaptive = parse_formats(data["streamingData"]["adaptiveFormats"].as_array());
        let audio = pick_adaptive_audio(&adaptive).ok_or_else(|| "no audio stream available".to_string())?;

        let raw_path = unique_download_path("m4a");
        let mp3_path = unique_download_path("mp3");
        let result = timeout(budget, async {
            fetch_to_file(&self.http, &audio.url, &raw_path, opts).await?;
            postprocess::audio::extract_mp3(&raw_path, &mp3_path)
                .await
                .map_err(|e| format!("mp3 conversion failed: {}", e))?;
            tokio::fs::metadata(&mp3_path)
                .await
                .map(|m| m.len())
                .map_err(|e| format!("mp3 metadata error: {}", e))
        })
        .await
        .map_err(|_| format!("audio download timed out ({}s)", budget.as_secs()))?;
        crate::core::utils::cleanup_files([&raw_path]);
        let file_size = result?;

        Ok(Downloaded {
            filename: sanitize_filename(&info.title, "mp3"),
            file_path: mp3_path,
            file_size,
            is_photo: false,
            info,
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
    fn test_extract_video_id() {
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=5"), Some("dQw4w9WgXcQ"));
        assert_eq!(extract_video_id("https://youtube.com/shorts/abc123def45"), Some("abc123def45"));
        assert_eq!(extract_video_id("https://youtube.com/"), None);
    }

    fn fmt(mime: &str, height: u64, bitrate: u64) -> StreamFormat {
        StreamFormat { url: "https://rr1.googlevideo.com/x".into(), mime_type: mime.into(), height, bitrate }
    }

    #[test]
    fn test_pick_progressive_prefers_720_cap() {
        let formats = vec![
            fmt("video/mp4; codecs=\"avc1\"", 360, 0),
            fmt("video/mp4; codecs=\"avc1\"", 720, 0),
            fmt("video/mp4; codecs=\"avc1\"", 1080, 0),
        ];
        assert_eq!(pick_progressive(&formats).unwrap().height, 720);
    }

    #[test]
    fn test_pick_progressive_falls_back_above_cap() {
        let formats = vec![fmt("video/mp4", 1080, 0), fmt("video/mp4", 1440, 0)];
        assert_eq!(pick_progressive(&formats).unwrap().height, 1080);
    }

    #[test]
    fn test_pick_adaptive_audio_by_bitrate() {
        let formats = vec![
            fmt("audio/mp4; codecs=\"mp4a\"", 0, 128_000),
            fmt("audio/mp4; codecs=\"mp4a\"", 0, 160_000),
            fmt("audio/webm; codecs=\"opus\"", 0, 999_000),
        ];
        assert_eq!(pick_adaptive_audio(&formats).unwrap().bitrate, 160_000);
    }

    #[test]
    fn test_media_info_parses_details() {
        let data = serde_json::json!({
            "videoDetails": {
                "title": "Clip",
                "author": "Someone",
                "lengthSeconds": "3800",
                "thumbnail": {"thumbnails": [
                    {"url": "https://i.ytimg.com/small.jpg"},
                    {"url": "https://i.ytimg.com/maxres.jpg"}
                ]}
            }
        });
        let info = PytubeProvider::media_info(&data);
        assert_eq!(info.duration_secs, 3800);
        assert_eq!(info.thumbnail_url.as_deref(), Some("https://i.ytimg.com/maxres.jpg"));
    }
}
