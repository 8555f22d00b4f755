//! Provider chain executor.
//!
//! Walks the routed provider chain in order, classifies every failure and
//! falls through until something succeeds or the chain is exhausted. The
//! classification feeds telemetry; the user only ever sees the mapped
//! template produced from the first provider's error.

use crate::core::config;
use crate::intake::{Bucket, Platform};
use crate::providers::{DownloadOpts, Payload, ProgressUpdate, ProviderRegistry};
use crate::routing::RoutingChain;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Failure classes, from worst to most benign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider is burned for this address for a while: blocks, bans,
    /// auth walls. Fall through immediately.
    HardKill,
    /// Connection died mid-flight; worth one more shot somewhere.
    Stall,
    /// Anything else. Log and move on.
    ProviderBug,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::HardKill => "HARD_KILL",
            ErrorClass::Stall => "STALL",
            ErrorClass::ProviderBug => "PROVIDER_BUG",
        }
    }
}

const HARD_KILL_MARKERS: &[&str] = &[
    "ssl: unexpected_eof",
    "ssl_error_eof",
    "403 forbidden",
    "429 too many",
    "sign in to confirm",
    "login required",
    "private video",
    "age-restricted",
];

const STALL_MARKERS: &[&str] = &[
    "download stalled",
    "connection timeout",
    "incomplete read",
    "no progress",
    "connection reset",
    "server disconnected",
];

/// Classifies a raw provider error string.
pub fn classify_error(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    if HARD_KILL_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::HardKill
    } else if STALL_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Stall
    } else {
        ErrorClass::ProviderBug
    }
}

const TRANSIENT_MARKERS: &[&str] = &["unable to extract", "no video formats", "connection reset", "timed out"];

const PERMANENT_MARKERS: &[&str] = &[
    "private",
    "login",
    "sign in",
    "age",
    "region",
    "not available",
    "copyright",
    "removed",
    "deleted",
    "unavailable",
    "blocked",
    "restricted",
    "nsfw",
];

/// Flaky-looking error that a second attempt against the same provider can
/// plausibly clear.
pub fn is_transient_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) && !PERMANENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// One failed provider invocation, recorded for telemetry.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub error: String,
    pub class: ErrorClass,
}

/// The whole chain failed. The first provider's error is the canonical
/// surface error; the attempt list feeds the telemetry row.
#[derive(Debug)]
pub struct ChainFailure {
    pub first_error: String,
    pub attempts: Vec<ProviderAttempt>,
}

/// Chain success: the payload plus which provider delivered it.
pub struct ChainSuccess {
    pub payload: Payload,
    pub api_source: String,
}

#[derive(Clone)]
pub struct ChainExecutor {
    registry: ProviderRegistry,
}

impl ChainExecutor {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    /// YouTube preflight: probes the duration through the secondary
    /// provider and picks the shorts/full bucket before chain resolution.
    /// A failed probe falls back to `Full`. The duration (when known) also
    /// feeds provider quality selection.
    pub async fn youtube_preflight(&self, url: &str, bucket: Bucket) -> (Bucket, Option<u64>) {
        if bucket == Bucket::Shorts {
            return (bucket, None);
        }
        let Some(probe_provider) = self.registry.get("pytubefix") else {
            return (Bucket::Full, None);
        };
        match probe_provider.get_info(url).await {
            Some(probe) if probe.duration_secs > 0 => {
                let bucket = if probe.duration_secs <= config::download::SHORTS_MAX_DURATION_SECS {
                    log::info!("Duration preflight: {}s -> shorts bucket", probe.duration_secs);
                    Bucket::Shorts
                } else {
                    Bucket::Full
                };
                (bucket, Some(probe.duration_secs))
            }
            _ => {
                log::debug!("Duration preflight failed for {}, assuming full", url);
                (Bucket::Full, None)
            }
        }
    }

    /// Tries providers in chain order until one succeeds.
    ///
    /// tiktok/pinterest sources get one extra same-provider attempt when the
    /// failure looks transient. Each invocation is bounded by its spec's
    /// download timeout.
    pub async fn execute(
        &self,
        chain: &RoutingChain,
        url: &str,
        platform: Platform,
        progress: Option<UnboundedSender<ProgressUpdate>>,
        duration_hint_secs: Option<u64>,
    ) -> Result<ChainSuccess, ChainFailure> {
        let retry_eligible = matches!(platform, Platform::Tiktok | Platform::Pinterest);
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        let enabled = chain.enabled_providers();
        let total = enabled.len();

        for (position, spec) in enabled.into_iter().enumerate() {
            let Some(provider) = self.registry.get(&spec.name) else {
                log::error!("[CHAIN] Unknown provider '{}' in chain for {}", spec.name, chain.source);
                attempts.push(ProviderAttempt {
                    provider: spec.name.clone(),
                    error: format!("unknown provider: {}", spec.name),
                    class: ErrorClass::ProviderBug,
                });
                continue;
            };

            let opts = DownloadOpts {
                connect_timeout: Some(Duration::from_secs(spec.connect_timeout_sec)),
                download_timeout: Some(Duration::from_secs(spec.download_timeout_sec)),
                progress: progress.clone(),
                duration_hint_secs,
            };

            log::info!(
                "[CHAIN] {} {}/{}: trying [{}]",
                chain.source,
                position + 1,
                total,
                spec.name
            );

            let mut error = match provider.download(url, &opts).await {
                Ok(payload) => {
                    log::info!("[CHAIN] ✅ [{}] succeeded for {}", spec.name, chain.source);
                    return Ok(ChainSuccess { payload, api_source: spec.name.clone() });
                }
                Err(e) => e,
            };

            if retry_eligible && is_transient_error(&error) {
                log::warn!(
                    "[CHAIN] [{}] transient error, retrying once in {}s: {}",
                    spec.name,
                    config::download::TRANSIENT_RETRY_DELAY_SECS,
                    error
                );
                tokio::time::sleep(config::download::transient_retry_delay()).await;
                match provider.download(url, &opts).await {
                    Ok(payload) => {
                        log::info!("[CHAIN] ✅ [{}] succeeded on retry", spec.name);
                        return Ok(ChainSuccess { payload, api_source: spec.name.clone() });
                    }
                    Err(e) => error = e,
                }
            }

            let class = classify_error(&error);
            log::warn!("[CHAIN] ❌ [{}] failed ({}): {}", spec.name, class.as_str(), error);
            attempts.push(ProviderAttempt { provider: spec.name.clone(), error, class });
        }

        let first_error = attempts
            .first()
            .map(|a| a.error.clone())
            .unwrap_or_else(|| "no providers available".to_string());
        log::error!(
            "[CHAIN] All {} providers failed for {} ({})",
            attempts.len(),
            chain.source,
            url
        );
        Err(ChainFailure { first_error, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Downloaded, MediaInfo, Provider};
    use crate::routing::ProviderSpec;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_classify_hard_kill() {
        assert_eq!(classify_error("HTTP Error 403 Forbidden"), ErrorClass::HardKill);
        assert_eq!(classify_error("429 Too Many Requests"), ErrorClass::HardKill);
        assert_eq!(classify_error("Sign in to confirm your age"), ErrorClass::HardKill);
        assert_eq!(classify_error("SSL: UNEXPECTED_EOF_WHILE_READING"), ErrorClass::HardKill);
        assert_eq!(classify_error("This is a private video"), ErrorClass::HardKill);
    }

    #[test]
    fn test_classify_stall() {
        assert_eq!(classify_error("Connection reset by peer"), ErrorClass::Stall);
        assert_eq!(classify_error("server disconnected unexpectedly"), ErrorClass::Stall);
        assert_eq!(classify_error("IncompleteRead(1024 bytes read)"), ErrorClass::Stall);
    }

    #[test]
    fn test_classify_default_is_provider_bug() {
        assert_eq!(classify_error("KeyError: 'formats'"), ErrorClass::ProviderBug);
        assert_eq!(classify_error(""), ErrorClass::ProviderBug);
    }

    #[test]
    fn test_transient_detection() {
        assert!(is_transient_error("Unable to extract video data"));
        assert!(is_transient_error("ERROR: No video formats found"));
        assert!(is_transient_error("download timed out (60s)"));
    }

    #[test]
    fn test_permanent_beats_transient() {
        // matches both lists; the permanent marker wins
        assert!(!is_transient_error("Unable to extract: video is private"));
        assert!(!is_transient_error("timed out; account restricted"));
        assert!(!is_transient_error("This video is unavailable"));
    }

    struct ScriptedProvider {
        name: &'static str,
        failures_before_success: u32,
        error: String,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn failing(name: &'static str, error: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                failures_before_success: u32::MAX,
                error: error.to_string(),
                calls: AtomicU32::new(0),
            })
        }

        fn flaky(name: &'static str, error: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                failures_before_success: failures,
                error: error.to_string(),
                calls: AtomicU32::new(0),
            })
        }

        fn succeeding(name: &'static str) -> Arc<Self> {
            Self::flaky(name, "", 0)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn download(&self, _url: &str, _opts: &DownloadOpts) -> Result<Payload, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(self.error.clone())
            } else {
                Ok(Payload::Single(Downloaded {
                    file_path: PathBuf::from("/tmp/downloads/test.mp4"),
                    filename: "test.mp4".into(),
                    file_size: 9 * 1024 * 1024,
                    is_photo: false,
                    info: MediaInfo::default(),
                    quota: None,
                    prep_ms: None,
                    download_ms: None,
                    download_host: None,
                }))
            }
        }
    }

    fn chain_of(names: &[&str]) -> RoutingChain {
        RoutingChain {
            source: "test".into(),
            providers: names.iter().map(|n| ProviderSpec::named(n)).collect(),
            is_override: false,
        }
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let first = ScriptedProvider::failing("ytdlp", "HTTP Error 403 forbidden");
        let second = ScriptedProvider::succeeding("rapidapi");
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![first.clone(), second.clone()]));

        let result = executor
            .execute(&chain_of(&["ytdlp", "rapidapi"]), "https://x", Platform::Instagram, None, None)
            .await
            .unwrap();
        assert_eq!(result.api_source, "rapidapi");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_first_error() {
        let first = ScriptedProvider::failing("ytdlp", "HTTP Error 403 forbidden");
        let second = ScriptedProvider::failing("pytubefix", "connection timeout");
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![first, second]));

        let failure = executor
            .execute(&chain_of(&["ytdlp", "pytubefix"]), "https://x", Platform::Youtube, None, None)
            .await
            .err()
            .unwrap();
        assert_eq!(failure.first_error, "HTTP Error 403 forbidden");
        assert_eq!(failure.attempts.len(), 2);
        assert_eq!(failure.attempts[0].class, ErrorClass::HardKill);
        assert_eq!(failure.attempts[1].class, ErrorClass::Stall);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retry_on_tiktok() {
        let flaky = ScriptedProvider::flaky("ytdlp", "Unable to extract video data", 1);
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![flaky.clone()]));

        let result = executor
            .execute(&chain_of(&["ytdlp"]), "https://x", Platform::Tiktok, None, None)
            .await
            .unwrap();
        assert_eq!(result.api_source, "ytdlp");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_transient_retry_on_youtube() {
        let flaky = ScriptedProvider::flaky("ytdlp", "Unable to extract video data", 1);
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![flaky.clone()]));

        let result = executor
            .execute(&chain_of(&["ytdlp"]), "https://x", Platform::Youtube, None, None)
            .await;
        assert!(result.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_for_permanent_error_on_tiktok() {
        let failing = ScriptedProvider::failing("ytdlp", "Unable to extract: video is private");
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![failing.clone()]));

        let _ = executor
            .execute(&chain_of(&["ytdlp"]), "https://x", Platform::Tiktok, None, None)
            .await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_skipped() {
        let first = ScriptedProvider::succeeding("ytdlp");
        let second = ScriptedProvider::succeeding("rapidapi");
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![first.clone(), second]));

        let mut chain = chain_of(&["ytdlp", "rapidapi"]);
        chain.providers[0].enabled = false;
        let result = executor
            .execute(&chain, "https://x", Platform::Instagram, None, None)
            .await
            .unwrap();
        assert_eq!(result.api_source, "rapidapi");
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_name_recorded_and_skipped() {
        let known = ScriptedProvider::succeeding("rapidapi");
        let executor = ChainExecutor::new(ProviderRegistry::from_providers(vec![known]));

        let result = executor
            .execute(&chain_of(&["nosuch", "rapidapi"]), "https://x", Platform::Instagram, None, None)
            .await
            .unwrap();
        assert_eq!(result.api_source, "rapidapi");
    }
}
