//! Delivered-artifact cache.
//!
//! Telegram keeps uploaded files addressable by `file_id`, so a video we
//! already delivered once can be re-sent instantly without touching any
//! provider. Records are keyed by an MD5 fingerprint of the canonical
//! resolved URL and expire after 7 days.

use crate::core::config;
use crate::intake::canonicalize_url;
use crate::storage::kv::Kv;
use md5::{Digest, Md5};

/// Upload handles from a previous successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedArtifact {
    pub video_file_id: Option<String>,
    pub audio_file_id: Option<String>,
}

#[derive(Clone)]
pub struct ArtifactCache {
    kv: Kv,
}

/// Fingerprint of a resolved URL: MD5 over the canonical form.
/// MD5 is fine here — the hash is a cache key, not a security boundary.
pub fn fingerprint(resolved_url: &str) -> String {
    let canonical = canonicalize_url(resolved_url);
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

impl ArtifactCache {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    /// Looks up delivered handles for a fingerprint. Store errors degrade to
    /// a cache miss.
    pub async fn lookup(&self, fp: &str) -> CachedArtifact {
        let video = match self.kv.get(&format!("video:{}", fp)).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Artifact cache get error: {}", e);
                None
            }
        };
        let audio = self.kv.get(&format!("audio:{}", fp)).await.unwrap_or_default();

        if video.is_some() || audio.is_some() {
            log::info!(
                "Cache hit for {}: video={}, audio={}",
                &fp[..8.min(fp.len())],
                video.is_some(),
                audio.is_some()
            );
        }

        CachedArtifact { video_file_id: video, audio_file_id: audio }
    }

    /// Stores delivered handles. Last writer wins across processes.
    pub async fn store(&self, fp: &str, video_file_id: Option<&str>, audio_file_id: Option<&str>) {
        let ttl = config::cache::ARTIFACT_TTL_SECS;
        if let Some(id) = video_file_id {
            if let Err(e) = self.kv.set_ex(&format!("video:{}", fp), id, ttl).await {
                log::warn!("Artifact cache set error (video): {}", e);
            }
        }
        if let Some(id) = audio_file_id {
            if let Err(e) = self.kv.set_ex(&format!("audio:{}", fp), id, ttl).await {
                log::warn!("Artifact cache set error (audio): {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fingerprint_is_md5_hex() {
        let fp = fingerprint("https://youtube.com/shorts/abc123");
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_ignores_tracking_params() {
        let a = fingerprint("https://youtube.com/shorts/abc123?feature=share&si=tracker");
        let b = fingerprint("https://youtube.com/shorts/abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_paths() {
        assert_ne!(
            fingerprint("https://youtube.com/shorts/abc123"),
            fingerprint("https://youtube.com/shorts/abc124")
        );
    }

    #[test]
    fn test_fingerprint_host_case_insensitive() {
        assert_eq!(
            fingerprint("https://YouTube.com/shorts/abc123"),
            fingerprint("https://youtube.com/shorts/abc123")
        );
    }
}
