//! All-in-one social downloader behind RapidAPI.
//!
//! One `autolink` call returns direct media URLs for Instagram posts,
//! reels, stories and carousels (and works as a fallback for TikTok and
//! Pinterest). Multi-media Instagram posts come back as several entries and
//! are delivered as a carousel payload.

use crate::core::config;
use crate::core::utils::{sanitize_filename, unique_download_path};
use crate::providers::{fetch_to_file, DownloadOpts, Downloaded, MediaInfo, Payload, Provider};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Telegram caps media groups at 10 items
const MAX_CAROUSEL_ITEMS: usize = 10;

pub struct RapidApiProvider {
    http: reqwest::Client,
    base_url: String,
    host_header: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiMedia {
    #[serde(default)]
    url: String,
    #[serde(default, rename = "type")]
    media_type: String,
    #[serde(default)]
    quality: String,
    #[serde(default)]
    extension: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    /// The API reports errors as `true` or as a message string
    #[serde(default)]
    error: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    medias: Vec<ApiMedia>,
}

/// Media entries worth delivering, in API order, deduplicated by URL.
/// Quality variants of one video share an URL prefix but not the URL itself,
/// so the first (best) video wins and later variants of the same item are
/// dropped by position for non-carousel posts.
fn select_medias(medias: &[ApiMedia], is_instagram: bool) -> Vec<ApiMedia> {
    let usable: Vec<ApiMedia> = medias
        .iter()
        .filter(|m| !m.url.is_empty() && (m.media_type == "video" || m.media_type == "image"))
        .cloned()
        .collect();

    let images = usable.iter().filter(|m| m.media_type == "image").count();

    // Instagram carousels mix distinct photos/videos; everything else is a
    // single item published in several qualities.
    if is_instagram && images >= 1 && usable.len() > 1 {
        return usable.into_iter().take(MAX_CAROUSEL_ITEMS).collect();
    }

    let best = usable
        .iter()
        .find(|m| m.media_type == "video")
        .or_else(|| usable.first())
        .cloned();
    best.into_iter().collect()
}

fn ext_for(media: &ApiMedia) -> &str {
    if !media.extension.is_empty() {
        return &media.extension;
    }
    if media.media_type == "image" {
        "jpg"
    } else {
        "mp4"
    }
}

impl RapidApiProvider {
    pub fn new() -> Self {
        let host = config::RAPIDAPI_HOST.clone();
        Self::with_base_url(&format!("https://{}", host), &host)
    }

    /// Custom endpoint, used by contract tests.
    pub fn with_base_url(base_url: &str, host_header: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            host_header: host_header.to_string(),
        }
    }

    async fn autolink(&self, url: &str) -> Result<(ApiResponse, Option<String>), String> {
        if config::RAPIDAPI_KEY.is_empty() {
            return Err("RAPIDAPI_KEY not configured".to_string());
        }

        let request = self
            .http
            .post(format!("{}/v1/social/autolink", self.base_url))
            .header("X-RapidAPI-Host", &self.host_header)
            .header("X-RapidAPI-Key", &*config::RAPIDAPI_KEY)
            .json(&serde_json::json!({ "url": url }));
        let response = timeout(API_TIMEOUT, request.send())
            .await
            .map_err(|_| "API timeout".to_string())?
            .map_err(|e| format!("API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("RapidAPI error {}: {}", status, &body[..body.len().min(200)]);
            return Err(format!("API error: {}", status));
        }

        let quota = response
            .headers()
            .get("x-ratelimit-requests-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data: ApiResponse = response.json().await.map_err(|e| format!("API parse error: {}", e))?;
        let has_error = match &data.error {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        };
        if has_error {
            let msg = data
                .message
                .clone()
                .or_else(|| data.error.as_str().map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(msg);
        }
        Ok((data, quota))
    }

    async fn download_media(
        &self,
        media: &ApiMedia,
        info: &MediaInfo,
        quota: Option<String>,
        opts: &DownloadOpts,
    ) -> Result<Downloaded, String> {
        let is_photo = media.media_type == "image";
        let ext = ext_for(media).to_string();
        let path = unique_download_path(&ext);

        let started = Instant::now();
        let (file_size, host) = fetch_to_file(&self.http, &media.url, &path, opts).await?;
        let download_ms = started.elapsed().as_millis() as u64;

        Ok(Downloaded {
            filename: sanitize_filename(&info.title, &ext),
            file_path: path,
            file_size,
            is_photo,
            info: info.clone(),
            quota,
            prep_ms: None,
            download_ms: Some(download_ms),
            download_host: host,
        })
    }
}

impl Default for RapidApiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for RapidApiProvider {
    fn name(&self) -> &'static str {
        "rapidapi"
    }

    async fn download(&self, url: &str, opts: &DownloadOpts) -> Result<Payload, String> {
        let budget = opts.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        let (data, quota) = self.autolink(url).await?;

        let is_instagram = url.contains("instagram.com") || url.contains("instagr.am");
        let selected = select_medias(&data.medias, is_instagram);
        if selected.is_empty() {
            return Err("No media found".to_string());
        }

        let platform = if is_instagram {
            "instagram"
        } else if url.contains("tiktok") {
            "tiktok"
        } else if url.contains("pinterest") || url.contains("pin.it") {
            "pinterest"
        } else {
            "unknown"
        };
        let info = MediaInfo {
            title: data.title.clone().unwrap_or_default().chars().take(100).collect(),
            author: data
                .author
                .clone()
                .or_else(|| data.username.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            duration_secs: 0,
            thumbnail_url: data.thumbnail.clone(),
            platform: platform.to_string(),
        };

        let work = async {
            if selected.len() == 1 {
                let downloaded = self.download_media(&selected[0], &info, quota.clone(), opts).await?;
                if !selected[0].quality.is_empty() {
                    log::debug!("rapidapi picked quality '{}'", selected[0].quality);
                }
                return Ok(Payload::Single(downloaded));
            }

            log::info!("rapidapi carousel with {} items", selected.len());
            let mut items = Vec::with_capacity(selected.len());
            for media in &selected {
                match self.download_media(media, &info, quota.clone(), opts).await {
                    Ok(downloaded) => items.push(downloaded),
                    Err(e) => log::warn!("carousel item failed, skipping: {}", e),
                }
            }
            if items.is_empty() {
                return Err("all carousel items failed".to_string());
            }
            if items.len() == 1 {
                let only = items.remove(0);
                return Ok(Payload::Single(only));
            }
            Ok(Payload::Carousel(items))
        };

        timeout(budget, work)
            .await
            .map_err(|_| format!("download timeout ({}s)", budget.as_secs()))?
    }
}
