//! Request intake: URL extraction, short-link resolution and classification.
//!
//! Supported platforms: TikTok (vm/vt short links included), Instagram
//! (reels, posts, stories, carousels), YouTube (shorts and full videos),
//! Pinterest (photos and videos).

pub mod resolve;

use once_cell::sync::Lazy;
use regex::Regex;

pub use resolve::resolve_short_url;

/// First URL from the supported host set. Subdomains (www, m, vm, vt,
/// country prefixes) are covered by the leading group.
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)https?://(?:[a-z0-9-]+\.)*(?:tiktok\.com|instagram\.com|instagr\.am|youtube\.com|youtu\.be|pinterest\.[a-z.]+|pin\.it)/[^\s]*",
    )
    .unwrap()
});

/// Supported source platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Pinterest,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Pinterest => "pinterest",
        }
    }

    /// CDN host reported in telemetry when the provider does not expose one.
    pub fn fallback_cdn_host(&self) -> &'static str {
        match self {
            Platform::Youtube => "googlevideo.com",
            Platform::Tiktok => "tiktokcdn.com",
            Platform::Instagram => "cdninstagram.com",
            Platform::Pinterest => "pinimg.com",
        }
    }
}

/// Content class within a platform. Decides the routing source key, the
/// gate policy and the delivery shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Shorts,
    Full,
    Reel,
    Post,
    Story,
    Carousel,
    Video,
    Photo,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Shorts => "shorts",
            Bucket::Full => "full",
            Bucket::Reel => "reel",
            Bucket::Post => "post",
            Bucket::Story => "story",
            Bucket::Carousel => "carousel",
            Bucket::Video => "video",
            Bucket::Photo => "photo",
        }
    }
}

/// Routing source key for (platform, bucket).
pub fn source_key(platform: Platform, bucket: Bucket) -> &'static str {
    match (platform, bucket) {
        (Platform::Youtube, Bucket::Shorts) => "youtube_shorts",
        (Platform::Youtube, _) => "youtube_full",
        (Platform::Instagram, Bucket::Reel) => "instagram_reel",
        (Platform::Instagram, Bucket::Story) => "instagram_story",
        (Platform::Instagram, Bucket::Carousel) => "instagram_carousel",
        (Platform::Instagram, _) => "instagram_post",
        (Platform::Tiktok, _) => "tiktok",
        (Platform::Pinterest, _) => "pinterest",
    }
}

/// Extracts the first supported URL from a message text.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_RE.find(text).map(|m| m.as_str())
}

/// Classifies a resolved URL into (platform, bucket).
///
/// The YouTube bucket here is provisional: `/shorts/` in the path is
/// authoritative, everything else defaults to `Full` and is refined by the
/// duration preflight in the chain executor.
pub fn classify(url: &str) -> Option<(Platform, Bucket)> {
    let lower = url.to_lowercase();
    let host = url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
    let host = host.unwrap_or_else(|| lower.clone());

    if host.contains("youtube.com") || host.contains("youtu.be") {
        let bucket = if lower.contains("/shorts/") { Bucket::Shorts } else { Bucket::Full };
        return Some((Platform::Youtube, bucket));
    }
    if host.contains("tiktok.com") {
        return Some((Platform::Tiktok, Bucket::Video));
    }
    if host.contains("instagram.com") || host.contains("instagr.am") {
        let bucket = if lower.contains("/reel") {
            Bucket::Reel
        } else if lower.contains("/stories/") {
            Bucket::Story
        } else {
            Bucket::Post
        };
        return Some((Platform::Instagram, bucket));
    }
    if host.contains("pinterest.") || host.contains("pin.it") {
        return Some((Platform::Pinterest, Bucket::Video));
    }

    None
}

/// Canonical form of a URL for fingerprinting: scheme + lowercased host +
/// path, with query (tracking parameters) and fragment stripped.
pub fn canonicalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let mut s = parsed.to_string();
            // Trailing slash is not significant for any supported platform
            if s.ends_with('/') && parsed.path() != "/" {
                s.pop();
            }
            s
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_url_first_match() {
        let text = "смотри https://vm.tiktok.com/ZM2abc/ и ещё https://youtu.be/xyz";
        assert_eq!(extract_url(text), Some("https://vm.tiktok.com/ZM2abc/"));
    }

    #[test]
    fn test_extract_url_case_insensitive() {
        assert!(extract_url("HTTPS://WWW.INSTAGRAM.COM/p/ABC/").is_some());
    }

    #[test]
    fn test_extract_url_none_for_plain_text() {
        assert_eq!(extract_url("привет, скачай мне видео"), None);
        assert_eq!(extract_url("https://example.com/video"), None);
    }

    #[test]
    fn test_classify_youtube_shorts() {
        let (p, b) = classify("https://youtube.com/shorts/abc123").unwrap();
        assert_eq!(p, Platform::Youtube);
        assert_eq!(b, Bucket::Shorts);
    }

    #[test]
    fn test_classify_youtube_full() {
        let (p, b) = classify("https://www.youtube.com/watch?v=LONG").unwrap();
        assert_eq!(p, Platform::Youtube);
        assert_eq!(b, Bucket::Full);
    }

    #[test]
    fn test_classify_instagram_buckets() {
        assert_eq!(classify("https://www.instagram.com/reel/XYZ/").unwrap().1, Bucket::Reel);
        assert_eq!(classify("https://www.instagram.com/reels/XYZ/").unwrap().1, Bucket::Reel);
        assert_eq!(
            classify("https://www.instagram.com/stories/user/123/").unwrap().1,
            Bucket::Story
        );
        assert_eq!(classify("https://www.instagram.com/p/CXYZ/").unwrap().1, Bucket::Post);
    }

    #[test]
    fn test_classify_tiktok_and_pinterest() {
        assert_eq!(
            classify("https://www.tiktok.com/@user/video/123").unwrap().0,
            Platform::Tiktok
        );
        assert_eq!(classify("https://pin.it/abcd").unwrap().0, Platform::Pinterest);
        assert_eq!(
            classify("https://ru.pinterest.com/pin/12345/").unwrap().0,
            Platform::Pinterest
        );
    }

    #[test]
    fn test_classify_unsupported_host() {
        assert_eq!(classify("https://vimeo.com/123"), None);
    }

    #[test]
    fn test_source_keys() {
        assert_eq!(source_key(Platform::Youtube, Bucket::Shorts), "youtube_shorts");
        assert_eq!(source_key(Platform::Youtube, Bucket::Full), "youtube_full");
        assert_eq!(source_key(Platform::Instagram, Bucket::Carousel), "instagram_carousel");
        assert_eq!(source_key(Platform::Tiktok, Bucket::Video), "tiktok");
        assert_eq!(source_key(Platform::Pinterest, Bucket::Photo), "pinterest");
    }

    #[test]
    fn test_canonicalize_strips_tracking() {
        assert_eq!(
            canonicalize_url("https://www.tiktok.com/@user/video/123?is_from_webapp=1&sender_device=pc"),
            canonicalize_url("https://www.tiktok.com/@user/video/123?utm_source=share")
        );
    }

    #[test]
    fn test_canonicalize_strips_fragment_and_slash() {
        assert_eq!(
            canonicalize_url("https://youtube.com/shorts/abc123/#t=5"),
            "https://youtube.com/shorts/abc123"
        );
    }

    #[test]
    fn test_classify_stable_under_canonicalization() {
        let raw = "https://youtube.com/shorts/abc123?feature=share";
        assert_eq!(classify(raw), classify(&canonicalize_url(raw)));
    }
}
