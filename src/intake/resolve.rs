//! Short-link resolution for the redirecting hosts.
//!
//! pin.it, vm/vt.tiktok.com, tiktok.com/t/ and instagr.am all answer with a
//! redirect to the real content URL. We follow it with a HEAD request so the
//! classifier and the cache fingerprint see the final URL.

use once_cell::sync::Lazy;
use std::time::Duration;

const RESOLVE_TIMEOUT_SECS: u64 = 10;

static RESOLVE_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(RESOLVE_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36")
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// True for hosts that always redirect to the canonical content URL.
pub fn is_short_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("pin.it/")
        || lower.contains("vt.tiktok.com/")
        || lower.contains("vm.tiktok.com/")
        || lower.contains("tiktok.com/t/")
        || lower.contains("instagr.am/")
}

/// Resolves a short link to its final URL by following redirects.
///
/// Returns the input unchanged for non-short hosts and on any network
/// failure — resolution is an optimization, never a hard dependency.
/// Idempotent: resolving an already-resolved URL returns it as is.
pub async fn resolve_short_url(url: &str) -> String {
    if !is_short_url(url) {
        return url.to_string();
    }

    match RESOLVE_CLIENT.head(url).send().await {
        Ok(resp) => {
            let final_url = resp.url().to_string();
            log::info!("[RESOLVE] {} -> {}", url, final_url);
            final_url
        }
        Err(e) => {
            log::warn!("[RESOLVE] Failed for {}: {}", url, e);
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_url_detection() {
        assert!(is_short_url("https://pin.it/abcd"));
        assert!(is_short_url("https://vm.tiktok.com/ZM2abc/"));
        assert!(is_short_url("https://vt.tiktok.com/ZS1xyz/"));
        assert!(is_short_url("https://www.tiktok.com/t/ZTabc/"));
        assert!(is_short_url("https://instagr.am/p/ABC/"));
    }

    #[test]
    fn test_full_urls_are_not_short() {
        assert!(!is_short_url("https://www.tiktok.com/@user/video/123"));
        assert!(!is_short_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_short_url("https://www.pinterest.com/pin/123/"));
    }

    #[tokio::test]
    async fn test_resolve_passthrough_for_full_url() {
        // Non-short hosts never touch the network
        let url = "https://www.youtube.com/watch?v=abc";
        assert_eq!(resolve_short_url(url).await, url);
    }
}
