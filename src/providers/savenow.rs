//! SaveNow.to provider (RapidAPI wrapper) for YouTube.
//!
//! The service prepares the file on its side and serves it from the
//! `*.savenow.to` CDN, so our own address never talks to googlevideo.
//! Flow: start job -> poll progress -> fetch from CDN. Long videos are the
//! whole point, hence the generous poll and download budgets.

use crate::core::config;
use crate::core::utils::{sanitize_filename, unique_download_path};
use crate::providers::{fetch_to_file, DownloadOpts, Downloaded, MediaInfo, Payload, Provider};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const DEFAULT_HOST: &str = "youtube-info-download-api.p.rapidapi.com";
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_TIME: Duration = Duration::from_secs(600);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1200);

pub struct SaveNowProvider {
    http: reqwest::Client,
    base_url: String,
    host_header: String,
}

/// Quality ladder by duration: short videos get 720p, everything over an
/// hour steps down so the result stays under the 2 GiB ceiling.
pub fn quality_for_duration(duration_secs: u64) -> &'static str {
    if duration_secs < 3600 {
        "720"
    } else if duration_secs < 10800 {
        "480"
    } else {
        "360"
    }
}

fn quota_from_headers(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-ratelimit-requests-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl SaveNowProvider {
    pub fn new() -> Self {
        Self::with_base_url(&format!("https://{}", DEFAULT_HOST), DEFAULT_HOST)
    }

    /// Custom endpoint, used by contract tests.
    pub fn with_base_url(base_url: &str, host_header: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            host_header: host_header.to_string(),
        }
    }

    async fn start_job(&self, url: &str, quality: &str) -> Result<(serde_json::Value, Option<String>), String> {
        if config::RAPIDAPI_KEY.is_empty() {
            return Err("RAPIDAPI_KEY not configured".to_string());
        }

        let response = self
            .http
            .get(format!("{}/ajax/download.php", self.base_url))
            .header("X-RapidAPI-Host", &self.host_header)
            .header("X-RapidAPI-Key", &*config::RAPIDAPI_KEY)
            .query(&[("format", quality), ("add_info", "1"), ("url", url)])
            .send()
            .await
            .map_err(|e| format!("job start failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("job start failed: HTTP {}", response.status()));
        }

        let quota = quota_from_headers(response.headers());
        if let Some(ref q) = quota {
            log::info!("[SAVENOW] quota remaining: {}", q);
        }

        let data: serde_json::Value = response.json().await.map_err(|e| format!("job parse error: {}", e))?;
        if !data["success"].as_bool().unwrap_or(false) {
            let err = data["error"].as_str().or_else(|| data["message"].as_str()).unwrap_or("job rejected");
            return Err(err.to_string());
        }
        Ok((data, quota))
    }

    /// Polls until the CDN URL is ready or the budget runs out.
    async fn poll_progress(&self, job_id: &str, progress_url: Option<&str>) -> Result<String, String> {
        let url = progress_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/ajax/progress.php?id={}", self.base_url, job_id));

        let deadline = Instant::now() + MAX_POLL_TIME;
        loop {
            if Instant::now() >= deadline {
                return Err(format!("preparation timeout ({}s)", MAX_POLL_TIME.as_secs()));
            }

            let response = self
                .http
                .get(&url)
                .header("X-RapidAPI-Host", &self.host_header)
                .header("X-RapidAPI-Key", &*config::RAPIDAPI_KEY)
                .send()
                .await
                .map_err(|e| format!("progress poll failed: {}", e))?;
            let data: serde_json::Value = response.json().await.map_err(|e| format!("progress parse error: {}", e))?;

            if data["success"].as_i64().unwrap_or(0) == 1 {
                if let Some(download_url) = data["download_url"].as_str().filter(|u| !u.is_empty()) {
                    return Ok(download_url.to_string());
                }
            }
            if let Some(text) = data["text"].as_str() {
                log::debug!("[SAVENOW] job {}: {} ({})", job_id, text, data["progress"].as_i64().unwrap_or(0));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Default for SaveNowProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SaveNowProvider {
    fn name(&self) -> &'static str {
        "savenow"
    }

    async fn download(&self, url: &str, opts: &DownloadOpts) -> Result<Payload, String> {
        let quality = quality_for_duration(opts.duration_hint_secs.unwrap_or(0));
        log::info!("[SAVENOW] Starting download: {}, quality={}", url, quality);

        let prep_started = Instant::now();
        let (job, quota) = self.start_job(url, quality).await?;
        let job_id = job["id"].as_str().unwrap_or_default().to_string();
        let title = job["title"].as_str().unwrap_or("video").to_string();
        let thumbnail_url = job["info"]["image"].as_str().map(str::to_string);
        let progress_url = job["progress_url"].as_str().map(str::to_string);

        let download_url = self.poll_progress(&job_id, progress_url.as_deref()).await?;
        let prep_ms = prep_started.elapsed().as_millis() as u64;

        let host = url::Url::parse(&download_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        if let Some(ref h) = host {
            log::info!("[SAVENOW] Download ready: host={}", h);
            if h.contains("googlevideo.com") {
                log::warn!("[SAVENOW] Got a googlevideo.com URL, the CDN proxy did not kick in");
            }
        }

        let output = unique_download_path("mp4");
        let budget = opts.download_timeout.map(|t| t.max(DOWNLOAD_TIMEOUT)).unwrap_or(DOWNLOAD_TIMEOUT);
        let download_started = Instant::now();
        let (file_size, actual_host) = timeout(budget, fetch_to_file(&self.http, &download_url, &output, opts))
            .await
            .map_err(|_| format!("download timeout ({}s)", budget.as_secs()))??;
        let download_ms = download_started.elapsed().as_millis() as u64;

        log::info!(
            "[SAVENOW] Done: {:.1} MB in {} ms (prep {} ms)",
            file_size as f64 / (1024.0 * 1024.0),
            download_ms,
            prep_ms
        );

        Ok(Payload::Single(Downloaded {
            filename: sanitize_filename(&title, "mp4"),
            file_path: output,
            file_size,
            is_photo: false,
            info: MediaInfo {
                title,
                author: "unknown".to_string(),
                duration_secs: opts.duration_hint_secs.unwrap_or(0),
                thumbnail_url,
                platform: "youtube".to_string(),
            },
            quota,
            prep_ms: Some(prep_ms),
            download_ms: Some(download_ms),
            download_host: actual_host.or(host),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quality_ladder() {
        assert_eq!(quality_for_duration(0), "720");
        assert_eq!(quality_for_duration(3599), "720");
        assert_eq!(quality_for_duration(3600), "480");
        assert_eq!(quality_for_duration(10800), "360");
    }

    #[test]
    fn test_quota_header_extraction() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-requests-remaining", "841".parse().unwrap());
        assert_eq!(quota_from_headers(&headers), Some("841".to_string()));
        assert_eq!(quota_from_headers(&reqwest::header::HeaderMap::new()), None);
    }
}
