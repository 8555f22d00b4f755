//! Provider adapters.
//!
//! Every external downloader is wrapped behind the same [`Provider`] trait:
//! routing chains refer to providers by name, the registry maps names to
//! implementations, and the chain executor treats them all identically.
//!
//! Implementations:
//! - `ytdlp` — yt-dlp subprocess (primary for YouTube/TikTok/Pinterest)
//! - `pytubefix` — direct Innertube player API client (secondary YouTube)
//! - `savenow` — SaveNow.to job API behind RapidAPI (YouTube via CDN proxy)
//! - `rapidapi` — all-in-one social downloader (Instagram, fallbacks)

pub mod pytubefix;
pub mod rapidapi;
pub mod savenow;
pub mod ytdlp;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Metadata describing the downloaded media.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub title: String,
    pub author: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
    pub platform: String,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            title: "video".to_string(),
            author: "unknown".to_string(),
            duration_secs: 0,
            thumbnail_url: None,
            platform: "unknown".to_string(),
        }
    }
}

/// One successfully fetched file, owned by the caller from here on.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub file_path: PathBuf,
    pub filename: String,
    pub file_size: u64,
    pub is_photo: bool,
    pub info: MediaInfo,
    /// Provider-reported remaining API quota, if exposed
    pub quota: Option<String>,
    /// Time from job start to first byte, when the provider measures it
    pub prep_ms: Option<u64>,
    /// Time spent streaming bytes, when the provider measures it
    pub download_ms: Option<u64>,
    /// CDN hostname that served the bytes
    pub download_host: Option<String>,
}

/// What a provider hands back: one file, or an ordered multi-media set
/// (Instagram carousels). Item 0 of a carousel carries the caption.
#[derive(Debug, Clone)]
pub enum Payload {
    Single(Downloaded),
    Carousel(Vec<Downloaded>),
}

impl Payload {
    pub fn files(&self) -> Vec<&Downloaded> {
        match self {
            Payload::Single(d) => vec![d],
            Payload::Carousel(items) => items.iter().collect(),
        }
    }
}

/// Lightweight metadata probe (no download).
#[derive(Debug, Clone)]
pub struct MediaProbe {
    pub title: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
}

/// Progress snapshot forwarded to the status-message updater.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressUpdate {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<u64>,
}

/// Per-invocation options handed to a provider.
#[derive(Clone, Default)]
pub struct DownloadOpts {
    pub connect_timeout: Option<Duration>,
    pub download_timeout: Option<Duration>,
    /// Providers that can report progress push snapshots here
    pub progress: Option<UnboundedSender<ProgressUpdate>>,
    /// Known media duration (from the preflight probe); lets quality
    /// selection happen before any provider-side metadata call
    pub duration_hint_secs: Option<u64>,
}

impl DownloadOpts {
    pub fn report(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(update);
        }
    }
}

/// Uniform capability over every external downloader.
///
/// Errors are raw provider text: the chain executor classifies them and the
/// message mapper turns them into user-facing templates. Providers never
/// talk to the user.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn download(&self, url: &str, opts: &DownloadOpts) -> Result<Payload, String>;

    /// Optional quick metadata probe (used for the YouTube duration
    /// preflight). Providers without one return None.
    async fn get_info(&self, _url: &str) -> Option<MediaProbe> {
        None
    }

    /// Optional direct audio download (MP3).
    async fn download_audio(&self, _url: &str, _opts: &DownloadOpts) -> Result<Downloaded, String> {
        Err("audio extraction not supported by this provider".to_string())
    }
}

/// Streams an HTTP body into a file. Shared by the HTTP-backed providers.
/// Returns the byte count and the serving host.
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &std::path::Path,
    opts: &DownloadOpts,
) -> Result<(u64, Option<String>), String> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let response = client.get(url).send().await.map_err(|e| format!("fetch failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("fetch failed: HTTP {}", response.status()));
    }

    let host = response.url().host_str().map(str::to_string);
    let total = response.content_length();
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| format!("create {} failed: {}", path.display(), e))?;

    let started = std::time::Instant::now();
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("stream error: {}", e))?;
        file.write_all(&chunk).await.map_err(|e| format!("write error: {}", e))?;
        written += chunk.len() as u64;

        let elapsed = started.elapsed().as_secs_f64();
        opts.report(ProgressUpdate {
            downloaded_bytes: written,
            total_bytes: total,
            speed_bytes_per_sec: if elapsed > 0.5 { Some((written as f64 / elapsed) as u64) } else { None },
        });
    }
    file.flush().await.map_err(|e| format!("flush error: {}", e))?;

    Ok((written, host))
}

/// Name -> implementation registry used by the chain executor.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Builds the production registry with all four providers.
    pub fn standard() -> Self {
        let mut providers: HashMap<&'static str, Arc<dyn Provider>> = HashMap::new();
        for provider in [
            Arc::new(ytdlp::YtdlpProvider::new()) as Arc<dyn Provider>,
            Arc::new(pytubefix::PytubeProvider::new()) as Arc<dyn Provider>,
            Arc::new(savenow::SaveNowProvider::new()) as Arc<dyn Provider>,
            Arc::new(rapidapi::RapidApiProvider::new()) as Arc<dyn Provider>,
        ] {
            providers.insert(provider.name(), provider);
        }
        Self { providers }
    }

    /// Registry from an explicit provider set (used in tests).
    pub fn from_providers(list: Vec<Arc<dyn Provider>>) -> Self {
        let mut providers = HashMap::new();
        for provider in list {
            providers.insert(provider.name(), provider);
        }
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_files_single() {
        let d = Downloaded {
            file_path: PathBuf::from("/tmp/downloads/a.mp4"),
            filename: "a.mp4".into(),
            file_size: 1,
            is_photo: false,
            info: MediaInfo::default(),
            quota: None,
            prep_ms: None,
            download_ms: None,
            download_host: None,
        };
        assert_eq!(Payload::Single(d.clone()).files().len(), 1);
        assert_eq!(Payload::Carousel(vec![d.clone(), d]).files().len(), 2);
    }

    #[test]
    fn test_standard_registry_has_all_routing_names() {
        let registry = ProviderRegistry::standard();
        for name in ["ytdlp", "pytubefix", "savenow", "rapidapi"] {
            assert!(registry.get(name).is_some(), "missing provider {}", name);
        }
        assert!(registry.get("nosuch").is_none());
    }
}
