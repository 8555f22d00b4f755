//! User-facing texts and the error mapper.
//!
//! Everything the user reads comes out of this module. Raw provider, SSL or
//! HTTP error strings never leave the logs: the mapper folds them into a
//! fixed set of template keys and each key has exactly one message.

use crate::core::config;
use crate::core::utils::{format_duration, quality_label, truncate_chars};
use crate::intake::{Bucket, Platform};

pub const TITLE_CAPTION_LIMIT: usize = 200;

/// Template keys a failure can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
    Private,
    TooLarge,
    NotFound,
    Timeout,
    Unavailable,
    Region,
    Processing,
    Connection,
    Api,
    Story,
    Unknown,
}

/// Maps a raw internal error to its template key. Match order resolves
/// ambiguity: earlier categories win.
pub fn error_key(raw: &str, is_story: bool) -> ErrorKey {
    if is_story {
        return ErrorKey::Story;
    }
    let lower = raw.to_lowercase();
    let contains = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if contains(&["private", "login", "sign in", "authentication", "age-restricted"]) {
        ErrorKey::Private
    } else if contains(&["too large", "слишком большой", "file is too big", "exceeds"]) {
        ErrorKey::TooLarge
    } else if contains(&["404", "not found", "removed", "deleted", "does not exist"]) {
        ErrorKey::NotFound
    } else if contains(&["timed out", "timeout", "таймаут"]) {
        ErrorKey::Timeout
    } else if contains(&["region", "geo", "country", "not available in your"]) {
        ErrorKey::Region
    } else if contains(&["unavailable", "not available", "age", "copyright", "nsfw", "restricted", "blocked"]) {
        ErrorKey::Unavailable
    } else if contains(&["postprocess", "ffmpeg", "merge failed", "no video streams"]) {
        ErrorKey::Processing
    } else if contains(&["connection", "reset", "ssl", "eof", "broken pipe", "network", "disconnected", "closing transport"]) {
        ErrorKey::Connection
    } else if contains(&["api", "quota", "rate limit", "429", "403", "forbidden", "key not configured"]) {
        ErrorKey::Api
    } else {
        ErrorKey::Unknown
    }
}

/// The single message template behind each key.
pub fn message_for_key(key: ErrorKey) -> &'static str {
    match key {
        ErrorKey::Private => "🔒 Это приватный контент, скачать его не получится.",
        ErrorKey::TooLarge => "❌ Файл слишком большой для Telegram (макс. 2 ГБ).",
        ErrorKey::NotFound => "🔍 Видео не найдено. Проверь ссылку.",
        ErrorKey::Timeout => "⏱ Не успел скачать за отведённое время. Попробуй ещё раз.",
        ErrorKey::Unavailable => "🚫 Видео недоступно для скачивания.",
        ErrorKey::Region => "🌍 Контент недоступен в регионе сервера.",
        ErrorKey::Processing => "⚙️ Не удалось обработать файл. Попробуй другую ссылку.",
        ErrorKey::Connection => "📡 Проблемы с соединением. Попробуй через пару минут.",
        ErrorKey::Api => "🔧 Сервис перегружен. Попробуй чуть позже.",
        ErrorKey::Story => "📖 Не удалось скачать историю. Возможно, она истекла или аккаунт закрыт.",
        ErrorKey::Unknown => "❌ Не удалось скачать. Попробуй другую ссылку.",
    }
}

/// One-stop mapping from a raw error to the user message.
pub fn user_error_message(raw: &str, is_story: bool) -> &'static str {
    message_for_key(error_key(raw, is_story))
}

pub fn hint_message() -> &'static str {
    "📎 Отправь мне ссылку на видео из TikTok, Instagram, YouTube Shorts или Pinterest"
}

pub fn invalid_url_message() -> &'static str {
    "❌ Не могу распознать ссылку. Поддерживаются: TikTok, Instagram, YouTube, Pinterest"
}

pub fn rate_limit_message() -> &'static str {
    "⏳ Слишком много загрузок одновременно. Дождись завершения текущих."
}

pub fn downloading_message() -> &'static str {
    "⏳ Скачиваю... Это может занять до минуты."
}

pub fn uploading_message() -> &'static str {
    "📤 Отправляю..."
}

pub fn start_message() -> &'static str {
    "👋 <b>Привет!</b>\n\nЯ умею скачивать видео из:\n• TikTok\n• Instagram (посты, reels, истории)\n• YouTube (Shorts и обычные видео)\n• Pinterest\n\n📎 Просто отправь мне ссылку!"
}

/// Fixed signature appended to everything we deliver.
pub fn signature() -> String {
    format!("Скачано через @{}", &*config::BOT_USERNAME)
}

/// Caption for the upload call. Full YouTube videos get title, quality and
/// duration on top of the signature; everything else is just the signature.
pub fn caption_for(platform: Platform, bucket: Bucket, title: &str, height: u32, duration_secs: u64) -> String {
    if platform == Platform::Youtube && bucket == Bucket::Full {
        let mut caption = truncate_chars(title, TITLE_CAPTION_LIMIT);
        if height > 0 {
            caption.push_str(&format!("\n{} | {}", quality_label(height), format_duration(duration_secs)));
        }
        caption.push('\n');
        caption.push_str(&signature());
        caption
    } else {
        signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ALL_KEYS: [ErrorKey; 11] = [
        ErrorKey::Private,
        ErrorKey::TooLarge,
        ErrorKey::NotFound,
        ErrorKey::Timeout,
        ErrorKey::Unavailable,
        ErrorKey::Region,
        ErrorKey::Processing,
        ErrorKey::Connection,
        ErrorKey::Api,
        ErrorKey::Story,
        ErrorKey::Unknown,
    ];

    #[test]
    fn test_every_key_has_a_message() {
        for key in ALL_KEYS {
            assert!(!message_for_key(key).is_empty());
        }
    }

    #[test]
    fn test_mapper_totality() {
        // anything unrecognized still maps to a known template
        assert_eq!(error_key("KeyError: 'formats'", false), ErrorKey::Unknown);
        assert_eq!(error_key("", false), ErrorKey::Unknown);
    }

    #[test]
    fn test_mapper_categories() {
        assert_eq!(error_key("This video is private", false), ErrorKey::Private);
        assert_eq!(error_key("Sign in to confirm you're not a bot", false), ErrorKey::Private);
        assert_eq!(error_key("Файл слишком большой (120MB)", false), ErrorKey::TooLarge);
        assert_eq!(error_key("HTTP Error 404: Not Found", false), ErrorKey::NotFound);
        assert_eq!(error_key("download timed out (60s)", false), ErrorKey::Timeout);
        assert_eq!(error_key("not available in your country", false), ErrorKey::Region);
        assert_eq!(error_key("Video unavailable", false), ErrorKey::Unavailable);
        assert_eq!(error_key("ffmpeg merge failed", false), ErrorKey::Processing);
        assert_eq!(error_key("Connection reset by peer", false), ErrorKey::Connection);
        assert_eq!(error_key("HTTP Error 403 Forbidden", false), ErrorKey::Api);
    }

    #[test]
    fn test_story_key_wins_over_everything() {
        assert_eq!(error_key("login required", true), ErrorKey::Story);
    }

    #[test]
    fn test_no_internal_details_leak() {
        // raw provider noise must come out as a clean template
        for raw in [
            "yt_dlp.utils.DownloadError: ERROR: unable to download video data: HTTP Error 403: Forbidden",
            "ssl.SSLEOFError: EOF occurred in violation of protocol",
            "Traceback (most recent call last): pytubefix.exceptions.VideoUnavailable",
        ] {
            let msg = user_error_message(raw, false);
            for needle in ["ytdlp", "yt_dlp", "pytubefix", "savenow", "rapidapi", "403", "Traceback", "ssl", "SSL"] {
                assert!(!msg.contains(needle), "{} leaked into {}", needle, msg);
            }
        }
    }

    #[test]
    fn test_caption_youtube_full() {
        let caption = caption_for(Platform::Youtube, Bucket::Full, "Big Documentary", 720, 3800);
        assert!(caption.starts_with("Big Documentary"));
        assert!(caption.contains("720p | 1:03:20"));
        assert!(caption.contains("Скачано через @"));
    }

    #[test]
    fn test_caption_truncates_long_title() {
        let long_title = "т".repeat(500);
        let caption = caption_for(Platform::Youtube, Bucket::Full, &long_title, 1080, 60);
        let first_line = caption.lines().next().unwrap();
        assert_eq!(first_line.chars().count(), TITLE_CAPTION_LIMIT);
    }

    #[test]
    fn test_caption_signature_only_for_other_buckets() {
        for (platform, bucket) in [
            (Platform::Youtube, Bucket::Shorts),
            (Platform::Tiktok, Bucket::Video),
            (Platform::Instagram, Bucket::Reel),
            (Platform::Pinterest, Bucket::Photo),
        ] {
            let caption = caption_for(platform, bucket, "Title", 1080, 60);
            assert!(caption.starts_with("Скачано через @"));
            assert!(!caption.contains("Title"));
        }
    }
}
