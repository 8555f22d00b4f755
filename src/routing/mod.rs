//! Dynamic provider routing.
//!
//! Per source key the engine resolves an ordered provider chain from three
//! layers: a time-bounded override, the saved baseline config, and the
//! built-in defaults. Both persisted layers live in Redis so operators can
//! reorder providers without a restart.

use crate::core::config;
use crate::storage::kv::Kv;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One provider entry in a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout", rename = "timeout_sec")]
    pub download_timeout_sec: u64,
    #[serde(default = "default_connect", rename = "connect_sec")]
    pub connect_timeout_sec: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    config::download::DEFAULT_TIMEOUT_SECS
}

fn default_connect() -> u64 {
    config::download::DEFAULT_CONNECT_SECS
}

impl ProviderSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            download_timeout_sec: default_timeout(),
            connect_timeout_sec: default_connect(),
        }
    }
}

/// Saved baseline entries may be full spec objects or bare name strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredSpec {
    Full(ProviderSpec),
    Name(String),
}

/// Override payload: plain name list plus an expiry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredOverride {
    chain: Vec<String>,
    expires_at: String,
}

/// Accepts RFC 3339 and the offset-less ISO form the admin panel writes
/// (naive timestamps are UTC).
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Resolved chain for a source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingChain {
    pub source: String,
    pub providers: Vec<ProviderSpec>,
    pub is_override: bool,
}

impl RoutingChain {
    /// Enabled provider names in priority order.
    pub fn enabled_providers(&self) -> Vec<&ProviderSpec> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }
}

/// Built-in default chain per source key.
pub fn default_chain_names(source: &str) -> &'static [&'static str] {
    match source {
        "youtube_full" | "youtube_shorts" => &["ytdlp", "pytubefix", "savenow"],
        "tiktok" | "pinterest" => &["ytdlp", "rapidapi"],
        "instagram_reel" | "instagram_post" | "instagram_story" | "instagram_carousel" => &["rapidapi"],
        _ => &["ytdlp"],
    }
}

fn default_chain(source: &str) -> RoutingChain {
    RoutingChain {
        source: source.to_string(),
        providers: default_chain_names(source).iter().map(|n| ProviderSpec::named(n)).collect(),
        is_override: false,
    }
}

/// Parses the saved baseline config value.
fn parse_saved_chain(source: &str, raw: &str) -> Option<RoutingChain> {
    let stored: Vec<StoredSpec> = serde_json::from_str(raw).ok()?;
    let providers: Vec<ProviderSpec> = stored
        .into_iter()
        .map(|s| match s {
            StoredSpec::Full(spec) => spec,
            StoredSpec::Name(name) => ProviderSpec::named(&name),
        })
        .collect();
    if providers.is_empty() {
        return None;
    }
    Some(RoutingChain { source: source.to_string(), providers, is_override: false })
}

/// Parses an override value, returning it only while it is still live.
fn parse_override(source: &str, raw: &str, now: DateTime<Utc>) -> Option<RoutingChain> {
    let stored: StoredOverride = serde_json::from_str(raw).ok()?;
    let expires_at = parse_expiry(&stored.expires_at)?;
    if expires_at <= now {
        log::debug!("[ROUTING] Override for {} expired at {}", source, expires_at);
        return None;
    }
    if stored.chain.is_empty() {
        return None;
    }
    Some(RoutingChain {
        source: source.to_string(),
        providers: stored.chain.iter().map(|n| ProviderSpec::named(n)).collect(),
        is_override: true,
    })
}

#[derive(Clone)]
pub struct RoutingEngine {
    kv: Kv,
}

impl RoutingEngine {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    /// Resolves the provider chain for a source key.
    ///
    /// Priority: unexpired override, then saved config, then the built-in
    /// default. Any store error logs and falls through — routing must never
    /// be the reason a download fails. The result is never empty.
    pub async fn get_chain(&self, source: &str) -> RoutingChain {
        match self.kv.get(&format!("routing_override:{}", source)).await {
            Ok(Some(raw)) => {
                if let Some(chain) = parse_override(source, &raw, Utc::now()) {
                    log::info!(
                        "[ROUTING] Using override for {}: {:?}",
                        source,
                        chain.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
                    );
                    return chain;
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("[ROUTING] Redis error for {}: {}, using default", source, e),
        }

        match self.kv.get(&format!("routing:{}", source)).await {
            Ok(Some(raw)) => {
                if let Some(chain) = parse_saved_chain(source, &raw) {
                    log::debug!(
                        "[ROUTING] Using saved config for {}: {:?}",
                        source,
                        chain.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
                    );
                    return chain;
                }
                log::warn!("[ROUTING] Unparseable saved config for {}, using default", source);
            }
            Ok(None) => {}
            Err(e) => log::warn!("[ROUTING] Redis error for {}: {}, using default", source, e),
        }

        let chain = default_chain(source);
        log::debug!(
            "[ROUTING] Using default for {}: {:?}",
            source,
            chain.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_chains_cover_all_source_keys() {
        for key in [
            "youtube_full",
            "youtube_shorts",
            "tiktok",
            "pinterest",
            "instagram_reel",
            "instagram_post",
            "instagram_story",
            "instagram_carousel",
        ] {
            assert!(!default_chain(key).providers.is_empty(), "empty chain for {}", key);
        }
    }

    #[test]
    fn test_default_chain_order_youtube() {
        let chain = default_chain("youtube_full");
        let names: Vec<_> = chain.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ytdlp", "pytubefix", "savenow"]);
        assert!(!chain.is_override);
    }

    #[test]
    fn test_default_chain_unknown_key_falls_back() {
        let chain = default_chain("twitch");
        assert_eq!(chain.providers.len(), 1);
        assert_eq!(chain.providers[0].name, "ytdlp");
    }

    #[test]
    fn test_parse_saved_chain_with_full_specs() {
        let raw = r#"[{"name":"rapidapi","enabled":true,"timeout_sec":90,"connect_sec":3},
                      {"name":"ytdlp","enabled":false}]"#;
        let chain = parse_saved_chain("tiktok", raw).unwrap();
        assert_eq!(chain.providers[0].download_timeout_sec, 90);
        assert_eq!(chain.providers[0].connect_timeout_sec, 3);
        assert!(!chain.providers[1].enabled);
        assert_eq!(chain.providers[1].download_timeout_sec, 60);
        assert_eq!(chain.enabled_providers().len(), 1);
    }

    #[test]
    fn test_parse_saved_chain_with_bare_names() {
        let chain = parse_saved_chain("pinterest", r#"["rapidapi","ytdlp"]"#).unwrap();
        assert_eq!(chain.providers.len(), 2);
        assert!(chain.providers.iter().all(|p| p.enabled));
    }

    #[test]
    fn test_parse_saved_chain_rejects_garbage() {
        assert!(parse_saved_chain("tiktok", "not json").is_none());
        assert!(parse_saved_chain("tiktok", "[]").is_none());
    }

    #[test]
    fn test_override_live() {
        let expires = Utc::now() + chrono::Duration::minutes(30);
        let raw = format!(r#"{{"chain":["savenow"],"expires_at":"{}"}}"#, expires.to_rfc3339());
        let chain = parse_override("youtube_full", &raw, Utc::now()).unwrap();
        assert!(chain.is_override);
        assert_eq!(chain.providers[0].name, "savenow");
    }

    #[test]
    fn test_override_expired_is_ignored() {
        let expires = Utc::now() - chrono::Duration::minutes(1);
        let raw = format!(r#"{{"chain":["savenow"],"expires_at":"{}"}}"#, expires.to_rfc3339());
        assert!(parse_override("youtube_full", &raw, Utc::now()).is_none());
    }

    #[test]
    fn test_override_accepts_naive_utc_timestamp() {
        // the admin panel writes isoformat() without an offset
        let expires = (Utc::now() + chrono::Duration::minutes(30)).format("%Y-%m-%dT%H:%M:%S%.6f");
        let raw = format!(r#"{{"chain":["pytubefix"],"expires_at":"{}"}}"#, expires);
        assert!(parse_override("youtube_full", &raw, Utc::now()).is_some());
    }

    #[test]
    fn test_override_garbage_expiry_is_ignored() {
        let raw = r#"{"chain":["savenow"],"expires_at":"tomorrow"}"#;
        assert!(parse_override("youtube_full", raw, Utc::now()).is_none());
    }
}
