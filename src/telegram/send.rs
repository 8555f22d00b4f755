//! Delivery with retry.
//!
//! The transport is known to drop oversized transfers mid-flight, so every
//! upload gets three attempts with 5/10/20 s backoff. Upload streams are
//! one-shot: the file (and thumbnail) is re-opened on every attempt. Each
//! attempt runs under a request-scoped deadline sized for the media kind.

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::intake::{Bucket, Platform};
use crate::postprocess::Processed;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, Message};
use tokio::time::timeout;

/// How a file goes out, by size and content class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Video,
    Document,
    Rejected,
}

/// Sizing rules: above 2 GiB nothing goes out; up to 50 MiB everything is
/// inline video; in between only full YouTube videos ride as documents.
pub fn delivery_mode(file_size: u64, platform: Platform, bucket: Bucket) -> DeliveryMode {
    if file_size > config::limits::MAX_DOCUMENT_BYTES {
        return DeliveryMode::Rejected;
    }
    if file_size <= config::limits::MAX_VIDEO_BYTES {
        return DeliveryMode::Video;
    }
    if platform == Platform::Youtube && bucket == Bucket::Full {
        DeliveryMode::Document
    } else {
        DeliveryMode::Rejected
    }
}

const RETRYABLE_MARKERS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "ssl",
    "eof",
    "read timeout",
    "timed out",
    "closing transport",
    "server disconnected",
    "network",
];

/// Transport errors worth another attempt. Everything else (bad request,
/// file rejected by the server) surfaces immediately.
pub fn is_retryable_transport_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Stale-handle detection for the cached-artifact path.
pub fn is_stale_handle_error(error: &teloxide::RequestError) -> bool {
    matches!(error, teloxide::RequestError::Api(_)) || format!("{}", error).to_lowercase().contains("bad request")
}

/// Runs `attempt` up to three times under `deadline`, backing off between
/// tries. The closure rebuilds the whole request, so file streams are fresh
/// on every attempt. Returns the response plus the duration of the
/// successful attempt only.
pub async fn send_with_retry<T, F, Fut>(deadline: Duration, what: &str, mut attempt: F) -> AppResult<(T, u64)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, teloxide::RequestError>>,
{
    let backoff = config::upload::RETRY_BACKOFF_SECS;
    let max_attempts = backoff.len();
    let mut last_error: Option<AppError> = None;

    for try_index in 0..max_attempts {
        let started = Instant::now();
        let result = timeout(deadline, attempt()).await;

        let error_text = match result {
            Ok(Ok(value)) => {
                let upload_ms = started.elapsed().as_millis() as u64;
                if try_index > 0 {
                    log::info!("✅ {} succeeded on attempt {}", what, try_index + 1);
                }
                return Ok((value, upload_ms));
            }
            Ok(Err(e)) => {
                let text = format!("{}", e);
                last_error = Some(AppError::Telegram(e));
                text
            }
            Err(_) => {
                let text = format!("{} read timeout ({}s)", what, deadline.as_secs());
                last_error = Some(AppError::Download(text.clone()));
                text
            }
        };

        if !is_retryable_transport_error(&error_text) {
            log::error!("❌ {} failed permanently: {}", what, error_text);
            return Err(last_error.unwrap_or_else(|| AppError::Download(error_text)));
        }

        if try_index + 1 < max_attempts {
            let delay = backoff[try_index];
            log::warn!(
                "{} attempt {}/{} failed (retrying in {}s): {}",
                what,
                try_index + 1,
                max_attempts,
                delay,
                error_text
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
        } else {
            log::error!("❌ {} failed after {} attempts: {}", what, max_attempts, error_text);
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::Download(format!("{} failed", what))))
}

/// Sends a local video file, inline or as a document. Metadata (dimensions,
/// duration, thumbnail, streaming flag) rides along so the messenger shows
/// a proper player.
pub async fn send_video_file(
    bot: &Bot,
    chat_id: ChatId,
    path: &Path,
    caption: &str,
    processed: &Processed,
    as_document: bool,
) -> AppResult<(Message, u64)> {
    let path = path.to_path_buf();
    let caption = caption.to_string();
    let processed = processed.clone();

    if as_document {
        let deadline = config::upload::document_timeout();
        return send_with_retry(deadline, "send_document", move || {
            let bot = bot.clone();
            let path = path.clone();
            let caption = caption.clone();
            let thumbnail = processed.thumbnail.clone();
            async move {
                let mut request = bot.send_document(chat_id, InputFile::file(path)).caption(caption);
                if let Some(thumb) = thumbnail {
                    request = request.thumbnail(InputFile::file(thumb));
                }
                request.await
            }
        })
        .await;
    }

    let deadline = config::upload::video_timeout();
    send_with_retry(deadline, "send_video", move || {
        let bot = bot.clone();
        let path = path.clone();
        let caption = caption.clone();
        let processed = processed.clone();
        async move {
            let mut request = bot
                .send_video(chat_id, InputFile::file(path))
                .caption(caption)
                .supports_streaming(true);
            if processed.width > 0 {
                request = request.width(processed.width);
            }
            if processed.height > 0 {
                request = request.height(processed.height);
            }
            if processed.duration_secs > 0 {
                request = request.duration(processed.duration_secs as u32);
            }
            if let Some(thumb) = processed.thumbnail.clone() {
                if thumb.exists() {
                    request = request.thumbnail(InputFile::file(thumb));
                }
            }
            request.await
        }
    })
    .await
}

/// Sends a local photo file.
pub async fn send_photo_file(bot: &Bot, chat_id: ChatId, path: &Path, caption: &str) -> AppResult<(Message, u64)> {
    let path = path.to_path_buf();
    let caption = caption.to_string();
    send_with_retry(config::upload::photo_timeout(), "send_photo", move || {
        let bot = bot.clone();
        let path = path.clone();
        let caption = caption.clone();
        async move { bot.send_photo(chat_id, InputFile::file(path)).caption(caption).await }
    })
    .await
}

/// Sends an MP3 follow-up.
pub async fn send_audio_file(
    bot: &Bot,
    chat_id: ChatId,
    path: &Path,
    title: &str,
    performer: &str,
) -> AppResult<(Message, u64)> {
    let path = path.to_path_buf();
    let title = title.to_string();
    let performer = performer.to_string();
    send_with_retry(config::upload::audio_timeout(), "send_audio", move || {
        let bot = bot.clone();
        let path = path.clone();
        let title = title.clone();
        let performer = performer.clone();
        async move {
            bot.send_audio(chat_id, InputFile::file(path))
                .title(title)
                .performer(performer)
                .await
        }
    })
    .await
}

/// One carousel entry: a local file plus its media kind.
pub struct CarouselItem {
    pub path: std::path::PathBuf,
    pub is_photo: bool,
}

/// Sends a 2..=10 item album. The caption rides on the first item.
pub async fn send_carousel(
    bot: &Bot,
    chat_id: ChatId,
    items: &[CarouselItem],
    caption: &str,
) -> AppResult<(Vec<Message>, u64)> {
    let caption = caption.to_string();
    let entries: Vec<(std::path::PathBuf, bool)> = items.iter().map(|i| (i.path.clone(), i.is_photo)).collect();

    send_with_retry(config::upload::media_group_timeout(), "send_media_group", move || {
        let bot = bot.clone();
        let caption = caption.clone();
        let entries = entries.clone();
        async move {
            let media: Vec<InputMedia> = entries
                .iter()
                .enumerate()
                .map(|(index, (path, is_photo))| {
                    let file = InputFile::file(path.clone());
                    if *is_photo {
                        let mut photo = InputMediaPhoto::new(file);
                        if index == 0 {
                            photo = photo.caption(caption.clone());
                        }
                        InputMedia::Photo(photo)
                    } else {
                        let mut video = InputMediaVideo::new(file);
                        if index == 0 {
                            video = video.caption(caption.clone());
                        }
                        InputMedia::Video(video)
                    }
                })
                .collect();
            bot.send_media_group(chat_id, media).await
        }
    })
    .await
}

/// Re-sends a previously delivered video by its upload handle. Single
/// attempt: a rejection means the handle is stale and the caller falls
/// through to the full pipeline.
pub async fn send_cached_video(
    bot: &Bot,
    chat_id: ChatId,
    file_id: &str,
    caption: &str,
) -> Result<Message, teloxide::RequestError> {
    bot.send_video(chat_id, InputFile::file_id(FileId(file_id.to_string())))
        .caption(caption)
        .supports_streaming(true)
        .await
}

/// Re-sends cached audio by handle. Best-effort companion to the video.
pub async fn send_cached_audio(
    bot: &Bot,
    chat_id: ChatId,
    file_id: &str,
) -> Result<Message, teloxide::RequestError> {
    bot.send_audio(chat_id, InputFile::file_id(FileId(file_id.to_string()))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_delivery_mode_small_files_are_video() {
        assert_eq!(delivery_mode(9 * MIB, Platform::Tiktok, Bucket::Video), DeliveryMode::Video);
        assert_eq!(delivery_mode(50 * MIB, Platform::Youtube, Bucket::Full), DeliveryMode::Video);
    }

    #[test]
    fn test_delivery_mode_youtube_full_document_band() {
        assert_eq!(delivery_mode(850 * MIB, Platform::Youtube, Bucket::Full), DeliveryMode::Document);
        // exactly 2 GiB still goes out as a document
        assert_eq!(delivery_mode(2 * GIB, Platform::Youtube, Bucket::Full), DeliveryMode::Document);
    }

    #[test]
    fn test_delivery_mode_2gib_plus_one_rejected_everywhere() {
        assert_eq!(delivery_mode(2 * GIB + 1, Platform::Youtube, Bucket::Full), DeliveryMode::Rejected);
        assert_eq!(delivery_mode(2 * GIB + 1, Platform::Tiktok, Bucket::Video), DeliveryMode::Rejected);
    }

    #[test]
    fn test_delivery_mode_non_youtube_over_50mib_rejected() {
        assert_eq!(delivery_mode(51 * MIB, Platform::Tiktok, Bucket::Video), DeliveryMode::Rejected);
        assert_eq!(delivery_mode(2 * GIB, Platform::Youtube, Bucket::Shorts), DeliveryMode::Rejected);
        assert_eq!(delivery_mode(51 * MIB, Platform::Instagram, Bucket::Reel), DeliveryMode::Rejected);
    }

    #[test]
    fn test_retryable_transport_errors() {
        for e in [
            "Connection reset by peer",
            "Broken pipe (os error 32)",
            "SSL EOF in violation of protocol",
            "read timeout",
            "closing transport",
            "Server disconnected",
        ] {
            assert!(is_retryable_transport_error(e), "{} should be retryable", e);
        }
    }

    #[test]
    fn test_non_retryable_transport_errors() {
        for e in [
            "Bad Request: file must be non-empty",
            "Bad Request: VIDEO_CONTENT_TYPE_INVALID",
            "Request Entity Too Large",
        ] {
            assert!(!is_retryable_transport_error(e), "{} should not be retryable", e);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_retry_two_failures_then_success() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let result = send_with_retry(Duration::from_secs(30), "test", move || {
            let calls = calls_inner.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err(teloxide::RequestError::Io(Arc::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    ))))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        let (value, _upload_ms) = result.unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_send_with_retry_permanent_error_stops_immediately() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let result: AppResult<(i32, u64)> = send_with_retry(Duration::from_secs(30), "test", move || {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(teloxide::RequestError::Io(Arc::new(std::io::Error::other(
                    "Bad Request: wrong file identifier",
                ))))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
