use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Bot username used in captions (without @)
pub static BOT_USERNAME: Lazy<String> =
    Lazy::new(|| env::var("BOT_USERNAME").unwrap_or_else(|_| "SaveNinja_bot".to_string()));

/// Scratch directory for downloads and intermediate files.
/// Every file inside is uniquely named; the request handler deletes its own
/// files on all exit paths.
pub static DOWNLOAD_DIR: Lazy<String> =
    Lazy::new(|| env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "/tmp/downloads".to_string()));

/// Redis connection URL (counters, routing config, artifact cache)
pub static REDIS_URL: Lazy<String> =
    Lazy::new(|| env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string()));

/// PostgreSQL connection URL (action_logs telemetry)
pub static DATABASE_URL: Lazy<String> = Lazy::new(|| env::var("DATABASE_URL").unwrap_or_else(|_| String::new()));

/// Cached yt-dlp binary path
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// RapidAPI key shared by the rapidapi and savenow providers
pub static RAPIDAPI_KEY: Lazy<String> = Lazy::new(|| env::var("RAPIDAPI_KEY").unwrap_or_else(|_| String::new()));

/// RapidAPI host for the all-in-one social downloader
pub static RAPIDAPI_HOST: Lazy<String> = Lazy::new(|| {
    env::var("RAPIDAPI_HOST").unwrap_or_else(|_| "social-download-all-in-one.p.rapidapi.com".to_string())
});

/// FlyerService API key (subscription gate). Empty disables the gate.
pub static FLYER_API_KEY: Lazy<String> = Lazy::new(|| env::var("FLYER_API_KEY").unwrap_or_else(|_| String::new()));

/// Bot record id in the admin database, stamped on every telemetry row
pub static BOT_ID: Lazy<Option<i64>> = Lazy::new(|| env::var("BOT_ID").ok().and_then(|v| v.parse().ok()));

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// File-size policy.
///
/// The 50 MiB / 2 GiB split is deliberate: Telegram accepts inline video up
/// to 50 MiB, documents up to 2 GiB. Only full-length YouTube videos get the
/// document path; everything else above 50 MiB is rejected.
pub mod limits {
    /// Maximum size sent as inline video
    pub const MAX_VIDEO_BYTES: u64 = 50 * 1024 * 1024;

    /// Hard ceiling: Telegram rejects uploads above 2 GiB
    pub const MAX_DOCUMENT_BYTES: u64 = 2 * 1024 * 1024 * 1024;
}

/// Concurrency slots and observability counters (Redis-backed).
pub mod slots {
    use super::env_u64;
    use once_cell::sync::Lazy;

    /// Parallel downloads allowed per user
    pub static USER_CAP: Lazy<u64> = Lazy::new(|| env_u64("USER_SLOT_CAP", 2));

    /// Per-user slot TTL in seconds. Self-heals leaked slots after crashes.
    pub const USER_TTL_SECS: i64 = 300;

    /// Parallel ffmpeg invocations across the whole process
    pub static FFMPEG_CAP: Lazy<u64> = Lazy::new(|| env_u64("FFMPEG_SLOT_CAP", 5));

    /// FFmpeg slot TTL in seconds
    pub const FFMPEG_TTL_SECS: i64 = 600;

    /// TTL for the active_downloads / active_uploads gauges
    pub const COUNTER_TTL_SECS: i64 = 300;
}

/// Download defaults used when a provider spec does not override them.
pub mod download {
    use super::Duration;

    /// Per-provider download budget in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Connection / ping budget in seconds
    pub const DEFAULT_CONNECT_SECS: u64 = 5;

    /// Pause before the single transient retry on tiktok/pinterest
    pub const TRANSIENT_RETRY_DELAY_SECS: u64 = 3;

    /// YouTube videos at or below this duration route as shorts
    pub const SHORTS_MAX_DURATION_SECS: u64 = 180;

    pub fn transient_retry_delay() -> Duration {
        Duration::from_secs(TRANSIENT_RETRY_DELAY_SECS)
    }
}

/// Upload retry policy and per-call request deadlines.
///
/// Deadlines are request-scoped, not socket-scoped: the whole transport call
/// is wrapped in a timeout sized for the media kind.
pub mod upload {
    use super::Duration;

    /// Backoff schedule between upload attempts
    pub const RETRY_BACKOFF_SECS: [u64; 3] = [5, 10, 20];

    pub const VIDEO_TIMEOUT_SECS: u64 = 2700;
    pub const DOCUMENT_TIMEOUT_SECS: u64 = 2700;
    pub const PHOTO_TIMEOUT_SECS: u64 = 300;
    pub const MEDIA_GROUP_TIMEOUT_SECS: u64 = 1200;
    pub const AUDIO_TIMEOUT_SECS: u64 = 600;

    pub fn video_timeout() -> Duration {
        Duration::from_secs(VIDEO_TIMEOUT_SECS)
    }

    pub fn document_timeout() -> Duration {
        Duration::from_secs(DOCUMENT_TIMEOUT_SECS)
    }

    pub fn photo_timeout() -> Duration {
        Duration::from_secs(PHOTO_TIMEOUT_SECS)
    }

    pub fn media_group_timeout() -> Duration {
        Duration::from_secs(MEDIA_GROUP_TIMEOUT_SECS)
    }

    pub fn audio_timeout() -> Duration {
        Duration::from_secs(AUDIO_TIMEOUT_SECS)
    }
}

/// Artifact cache (delivered file_id) settings.
pub mod cache {
    /// file_id records expire after 7 days
    pub const ARTIFACT_TTL_SECS: i64 = 7 * 24 * 60 * 60;
}

/// Progress updater settings.
pub mod progress {
    use super::Duration;

    /// Interval between status-message edits
    pub const TICK_SECS: u64 = 60;

    pub fn tick() -> Duration {
        Duration::from_secs(TICK_SECS)
    }
}

/// Monetization gate knobs.
pub mod gate {
    use super::env_u64;
    use once_cell::sync::Lazy;

    /// Days after registration with no checks at all
    pub static FREE_DAYS: Lazy<u64> = Lazy::new(|| env_u64("FLYER_FREE_DAYS", 0));

    /// First N successful downloads with no checks
    pub static FREE_DOWNLOADS: Lazy<u64> = Lazy::new(|| env_u64("FLYER_FREE_DOWNLOADS", 0));

    /// Full YouTube videos free for the first N, gated afterwards
    pub static YOUTUBE_FULL_FREE_COUNT: Lazy<u64> = Lazy::new(|| env_u64("FLYER_YOUTUBE_FULL_FREE", 0));

    /// Instagram gated on every Nth download
    pub static INSTAGRAM_CHECK_EVERY: Lazy<u64> = Lazy::new(|| env_u64("FLYER_INSTAGRAM_EVERY", 3));
}

/// System metrics sampling.
pub mod system {
    use super::Duration;

    pub const SAMPLE_INTERVAL_SECS: u64 = 30;

    /// Gauge keys expire if the sampler dies
    pub const GAUGE_TTL_SECS: i64 = 120;

    pub fn sample_interval() -> Duration {
        Duration::from_secs(SAMPLE_INTERVAL_SECS)
    }
}
