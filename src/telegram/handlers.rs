//! Request orchestration.
//!
//! One message with a link runs the whole pipeline:
//! intake -> cache -> gate -> slot -> routing -> provider chain ->
//! post-processing -> delivery -> telemetry -> cache store -> cleanup.
//! Every step after slot acquisition is wrapped so the slot, the gauges and
//! the temp files are released on all exit paths.

use crate::core::error::AppError;
use crate::core::utils::cleanup_files;
use crate::download::executor::ChainFailure;
use crate::download::progress::spawn_updater;
use crate::intake::{self, Bucket, Platform};
use crate::postprocess;
use crate::providers::{Downloaded, Payload, ProgressUpdate};
use crate::storage::artifact_cache::fingerprint;
use crate::storage::telemetry::{ErrorDetails, Measurements, SuccessDetails};
use crate::storage::Action;
use crate::telegram::messages;
use crate::telegram::send::{self, CarouselItem, DeliveryMode};
use crate::telegram::AppState;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Terminal success data for the telemetry row and the artifact cache.
struct DeliveryReport {
    api_source: String,
    media_type: &'static str,
    files_count: usize,
    has_video: bool,
    file_size: u64,
    prep_ms: u64,
    download_ms: u64,
    upload_ms: u64,
    download_host: String,
    quota: Option<String>,
    video_file_id: Option<String>,
    audio_file_id: Option<String>,
    /// Bucket may be upgraded to carousel post-download
    bucket: Bucket,
}

/// Terminal failure data: raw first error plus the per-provider trace.
struct FailureReport {
    error: String,
    attempts: Vec<crate::download::ProviderAttempt>,
}

impl FailureReport {
    fn plain(error: impl Into<String>) -> Self {
        Self { error: error.into(), attempts: Vec::new() }
    }
}

impl From<ChainFailure> for FailureReport {
    fn from(failure: ChainFailure) -> Self {
        Self { error: failure.first_error, attempts: failure.attempts }
    }
}

/// Entry point wired into the dispatcher.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else { return Ok(()) };
    let chat_id = msg.chat.id;

    if text.starts_with("/start") || text.starts_with("/help") {
        let _ = bot
            .send_message(chat_id, messages::start_message())
            .parse_mode(ParseMode::Html)
            .await;
        return Ok(());
    }
    if text.starts_with('/') {
        return Ok(());
    }

    let Some(url) = intake::extract_url(text) else {
        let _ = bot.send_message(chat_id, messages::hint_message()).await;
        return Ok(());
    };

    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(chat_id.0);
    let language = msg
        .from
        .as_ref()
        .and_then(|u| u.language_code.clone())
        .unwrap_or_else(|| "ru".to_string());

    run_request(bot, chat_id, user_id, &language, url, state).await;
    Ok(())
}

async fn run_request(bot: Bot, chat_id: ChatId, user_id: i64, language: &str, raw_url: &str, state: Arc<AppState>) {
    let started = Instant::now();
    let correlation_id = Uuid::new_v4();

    // Step 1: intake — resolve the short link and classify
    let resolved = intake::resolve_short_url(raw_url).await;
    let Some((platform, mut bucket)) = intake::classify(&resolved) else {
        let _ = bot.send_message(chat_id, messages::invalid_url_message()).await;
        return;
    };
    log::info!(
        "[{}] Download request: user={}, platform={}, url={}",
        correlation_id,
        user_id,
        platform.as_str(),
        resolved
    );

    state
        .telemetry
        .log_action(
            user_id,
            Action::DownloadRequest,
            serde_json::json!({
                "platform": platform.as_str(),
                "bucket": bucket.as_str(),
                "url": resolved,
            }),
            None,
            Measurements::default(),
        )
        .await;

    // Step 2: artifact cache — a delivered file_id beats any provider
    let fp = fingerprint(&resolved);
    let cached = state.cache.lookup(&fp).await;
    if let Some(video_id) = &cached.video_file_id {
        match send::send_cached_video(&bot, chat_id, video_id, &messages::signature()).await {
            Ok(_) => {
                if let Some(audio_id) = &cached.audio_file_id {
                    let _ = send::send_cached_audio(&bot, chat_id, audio_id).await;
                }
                log::info!("[{}] Served from cache ({})", correlation_id, &fp[..8]);
                return;
            }
            Err(e) if send::is_stale_handle_error(&e) => {
                // Stale or revoked handle: never fatal, run the pipeline
                log::warn!("[{}] Cached handle rejected ({}), re-downloading", correlation_id, e);
            }
            Err(e) => {
                log::warn!("[{}] Cached re-send transport error ({}), re-downloading", correlation_id, e);
            }
        }
    }

    // Step 3: YouTube bucket refinement — the URL alone cannot tell a short
    // clip from a feature film
    let mut duration_hint = None;
    if platform == Platform::Youtube {
        let (refined, duration) = state.executor.youtube_preflight(&resolved, bucket).await;
        bucket = refined;
        duration_hint = duration;
    }

    // Step 4: gate — before any slot or work
    let gate_outcome = state.gate.check_and_allow(user_id, platform, bucket, language).await;
    if !gate_outcome.allowed {
        state
            .telemetry
            .log_action(
                user_id,
                Action::FlyerAdShown,
                serde_json::json!({ "platform": platform.as_str(), "bucket": bucket.as_str() }),
                None,
                Measurements::default(),
            )
            .await;
        log::info!("[{}] Gate blocked user {}", correlation_id, user_id);
        return;
    }

    // Step 5: per-user slot — reject, never queue
    if !state.slots.acquire_user(user_id).await {
        let _ = bot.send_message(chat_id, messages::rate_limit_message()).await;
        return;
    }

    state.slots.incr_active_downloads().await;
    let status_msg = bot.send_message(chat_id, messages::downloading_message()).await.ok();

    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let progress_handle = status_msg
        .as_ref()
        .map(|m| spawn_updater(bot.clone(), chat_id, m.id, progress_rx));

    // Steps 6-9: routing, chain, post-processing, delivery
    let result = process_download(
        &bot,
        chat_id,
        user_id,
        &state,
        &resolved,
        platform,
        bucket,
        duration_hint,
        progress_tx,
        started,
    )
    .await;

    if let Some(handle) = progress_handle {
        handle.finish().await;
    }
    state.slots.decr_active_downloads().await;
    state.slots.release_user(user_id).await;

    let total_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(report) => {
            if let Some(status) = &status_msg {
                let _ = bot.delete_message(chat_id, status.id).await;
            }

            let speed_kbps = if report.download_ms > 0 {
                Some((report.file_size as i64 * 1000) / (1024 * report.download_ms as i64))
            } else {
                None
            };
            let details = SuccessDetails {
                platform: platform.as_str().to_string(),
                bucket: report.bucket.as_str().to_string(),
                media_type: report.media_type.to_string(),
                prep_ms: report.prep_ms,
                download_ms: report.download_ms,
                upload_ms: report.upload_ms,
                total_ms,
                download_host: report.download_host.clone(),
                flyer_required: gate_outcome.flyer_required,
                quota: report.quota.clone(),
                files_count: (report.media_type == "carousel").then_some(report.files_count),
                has_video: (report.media_type == "carousel").then_some(report.has_video),
            };
            state
                .telemetry
                .log_action(
                    user_id,
                    Action::DownloadSuccess,
                    serde_json::to_value(&details).unwrap_or_default(),
                    Some(&report.api_source),
                    Measurements {
                        download_time_ms: Some(report.download_ms as i64),
                        file_size_bytes: Some(report.file_size as i64),
                        download_speed_kbps: speed_kbps,
                    },
                )
                .await;

            state
                .cache
                .store(&fp, report.video_file_id.as_deref(), report.audio_file_id.as_deref())
                .await;

            log::info!(
                "[{}] ✅ Delivered {} via {} in {} ms",
                correlation_id,
                report.media_type,
                report.api_source,
                total_ms
            );
        }
        Err(failure) => {
            let user_text = messages::user_error_message(&failure.error, bucket == Bucket::Story);
            match &status_msg {
                Some(status) => {
                    let _ = bot.edit_message_text(chat_id, status.id, user_text).await;
                }
                None => {
                    let _ = bot.send_message(chat_id, user_text).await;
                }
            }

            let first_class = failure
                .attempts
                .first()
                .map(|a| a.class.as_str())
                .unwrap_or("PROVIDER_BUG");
            let details = ErrorDetails {
                platform: platform.as_str().to_string(),
                bucket: bucket.as_str().to_string(),
                error: failure.error.clone(),
                error_class: first_class.to_string(),
                providers_tried: failure.attempts.iter().map(|a| a.provider.clone()).collect(),
                provider_errors: failure
                    .attempts
                    .iter()
                    .map(|a| (a.provider.clone(), a.class.as_str().to_string()))
                    .collect::<BTreeMap<_, _>>(),
            };
            state
                .telemetry
                .log_action(
                    user_id,
                    Action::DownloadError,
                    serde_json::to_value(&details).unwrap_or_default(),
                    None,
                    Measurements::default(),
                )
                .await;

            log::warn!("[{}] ❌ Request failed: {}", correlation_id, failure.error);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_download(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    state: &AppState,
    url: &str,
    platform: Platform,
    bucket: Bucket,
    duration_hint: Option<u64>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    request_started: Instant,
) -> Result<DeliveryReport, FailureReport> {
    // Step 6: routing — operator-controlled provider chain
    let source_key = intake::source_key(platform, bucket);
    let chain = state.routing.get_chain(source_key).await;

    // Step 7: the chain
    let chain_started = Instant::now();
    let success = state
        .executor
        .execute(&chain, url, platform, Some(progress_tx), duration_hint)
        .await
        .map_err(FailureReport::from)?;
    let chain_ms = chain_started.elapsed().as_millis() as u64;

    // Everything created below is removed before returning, success or not
    let mut temp_files: Vec<PathBuf> = success.payload.files().iter().map(|f| f.file_path.clone()).collect();

    let outcome = deliver_payload(
        bot,
        chat_id,
        user_id,
        state,
        platform,
        bucket,
        &success.payload,
        &success.api_source,
        chain_ms,
        request_started,
        &mut temp_files,
    )
    .await;

    cleanup_files(&temp_files);
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn deliver_payload(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    state: &AppState,
    platform: Platform,
    bucket: Bucket,
    payload: &Payload,
    api_source: &str,
    chain_ms: u64,
    request_started: Instant,
    temp_files: &mut Vec<PathBuf>,
) -> Result<DeliveryReport, FailureReport> {
    match payload {
        Payload::Single(item) if item.is_photo => deliver_photo(bot, chat_id, state, platform, bucket, item, api_source, chain_ms).await,
        Payload::Single(item) => {
            deliver_video(bot, chat_id, state, platform, bucket, item, api_source, chain_ms, temp_files).await
        }
        Payload::Carousel(items) => {
            deliver_carousel(
                bot,
                chat_id,
                user_id,
                state,
                platform,
                items,
                api_source,
                chain_ms,
                request_started,
                temp_files,
            )
            .await
        }
    }
}

fn stage_timings(item: &Downloaded, chain_ms: u64) -> (u64, u64) {
    let download_ms = item.download_ms.unwrap_or(chain_ms);
    let prep_ms = item.prep_ms.unwrap_or_else(|| chain_ms.saturating_sub(download_ms));
    (prep_ms, download_ms)
}

fn host_or_fallback(item: &Downloaded, platform: Platform) -> String {
    item.download_host
        .clone()
        .unwrap_or_else(|| platform.fallback_cdn_host().to_string())
}

#[allow(clippy::too_many_arguments)]
async fn deliver_photo(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    platform: Platform,
    bucket: Bucket,
    item: &Downloaded,
    api_source: &str,
    chain_ms: u64,
) -> Result<DeliveryReport, FailureReport> {
    state.slots.incr_active_uploads().await;
    let sent = send::send_photo_file(bot, chat_id, &item.file_path, &messages::signature()).await;
    state.slots.decr_active_uploads().await;

    let (_message, upload_ms) = sent.map_err(|e| FailureReport::plain(e.to_string()))?;
    let (prep_ms, download_ms) = stage_timings(item, chain_ms);

    Ok(DeliveryReport {
        api_source: api_source.to_string(),
        media_type: "photo",
        files_count: 1,
        has_video: false,
        file_size: item.file_size,
        prep_ms,
        download_ms,
        upload_ms,
        download_host: host_or_fallback(item, platform),
        quota: item.quota.clone(),
        // a photo handle cannot be replayed through send_video, so the
        // cache only learns video/audio handles
        video_file_id: None,
        audio_file_id: None,
        bucket,
    })
}

#[allow(clippy::too_many_arguments)]
async fn deliver_video(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    platform: Platform,
    bucket: Bucket,
    item: &Downloaded,
    api_source: &str,
    chain_ms: u64,
    temp_files: &mut Vec<PathBuf>,
) -> Result<DeliveryReport, FailureReport> {
    // Size gate before any ffmpeg time is spent
    let mode = send::delivery_mode(item.file_size, platform, bucket);
    if mode == DeliveryMode::Rejected {
        return Err(FailureReport::plain(AppError::SizeExceeded(item.file_size).to_string()));
    }

    // Step 8: post-processing (aspect fix, faststart, probe, thumbnail)
    let processed = postprocess::run_video(
        &state.slots,
        &state.http,
        &item.file_path,
        item.info.thumbnail_url.as_deref(),
    )
    .await;
    if let Some(thumb) = &processed.thumbnail {
        temp_files.push(thumb.clone());
    }

    // Re-check: the aspect fix can re-encode and change the size
    let file_size = tokio::fs::metadata(&item.file_path)
        .await
        .map(|m| m.len())
        .unwrap_or(item.file_size);
    let mode = send::delivery_mode(file_size, platform, bucket);
    if mode == DeliveryMode::Rejected {
        return Err(FailureReport::plain(AppError::SizeExceeded(file_size).to_string()));
    }

    let duration = if processed.duration_secs > 0 {
        processed.duration_secs
    } else {
        item.info.duration_secs
    };
    let caption = messages::caption_for(platform, bucket, &item.info.title, processed.height, duration);

    // Step 9: delivery with retry
    state.slots.incr_active_uploads().await;
    let sent = send::send_video_file(
        bot,
        chat_id,
        &item.file_path,
        &caption,
        &processed,
        mode == DeliveryMode::Document,
    )
    .await;
    state.slots.decr_active_uploads().await;

    let (message, upload_ms) = sent.map_err(|e| FailureReport::plain(e.to_string()))?;
    let video_file_id = message
        .video()
        .map(|v| v.file.id.0.clone())
        .or_else(|| message.document().map(|d| d.file.id.0.clone()));

    let (prep_ms, download_ms) = stage_timings(item, chain_ms);
    Ok(DeliveryReport {
        api_source: api_source.to_string(),
        media_type: "video",
        files_count: 1,
        has_video: true,
        file_size,
        prep_ms,
        download_ms,
        upload_ms,
        download_host: host_or_fallback(item, platform),
        quota: item.quota.clone(),
        video_file_id,
        audio_file_id: None,
        bucket,
    })
}

#[allow(clippy::too_many_arguments)]
async fn deliver_carousel(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    state: &AppState,
    platform: Platform,
    items: &[Downloaded],
    api_source: &str,
    chain_ms: u64,
    request_started: Instant,
    temp_files: &mut Vec<PathBuf>,
) -> Result<DeliveryReport, FailureReport> {
    // Multiple media found post-download: the post is a carousel
    let bucket = Bucket::Carousel;

    // Fix + faststart apply to the video items only
    for item in items.iter().filter(|i| !i.is_photo) {
        let slot_taken = state.slots.acquire_ffmpeg().await;
        if let Err(e) = postprocess::video::fix_video(&item.file_path).await {
            log::warn!("carousel video fix failed (keeping original): {}", e);
        }
        if let Err(e) = postprocess::video::ensure_faststart(&item.file_path).await {
            log::warn!("carousel faststart failed (keeping original): {}", e);
        }
        if slot_taken {
            state.slots.release_ffmpeg().await;
        }
    }

    let carousel_items: Vec<CarouselItem> = items
        .iter()
        .map(|i| CarouselItem { path: i.file_path.clone(), is_photo: i.is_photo })
        .collect();
    let caption = messages::signature();

    state.slots.incr_active_uploads().await;
    let sent = send::send_carousel(bot, chat_id, &carousel_items, &caption).await;
    state.slots.decr_active_uploads().await;
    let (_messages, upload_ms) = sent.map_err(|e| FailureReport::plain(e.to_string()))?;

    // Audio follow-up: soundtrack of the first video as a separate MP3
    let mut audio_file_id = None;
    if let Some(first_video) = items.iter().find(|i| !i.is_photo) {
        audio_file_id = extract_and_send_audio(bot, chat_id, user_id, state, first_video, request_started, temp_files).await;
    }

    let total_size: u64 = items.iter().map(|i| i.file_size).sum();
    let first = &items[0];
    let (prep_ms, download_ms) = stage_timings(first, chain_ms);
    Ok(DeliveryReport {
        api_source: api_source.to_string(),
        media_type: "carousel",
        files_count: items.len(),
        has_video: items.iter().any(|i| !i.is_photo),
        file_size: total_size,
        prep_ms,
        download_ms,
        upload_ms,
        download_host: host_or_fallback(first, platform),
        quota: first.quota.clone(),
        video_file_id: None,
        audio_file_id,
        bucket,
    })
}

/// Extracts the MP3 track of a delivered video and sends it as a follow-up.
/// Best-effort: a failure only costs the bonus audio message.
async fn extract_and_send_audio(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    state: &AppState,
    video: &Downloaded,
    request_started: Instant,
    temp_files: &mut Vec<PathBuf>,
) -> Option<String> {
    let mp3_path = video.file_path.with_extension("mp3");
    temp_files.push(mp3_path.clone());

    let slot_taken = state.slots.acquire_ffmpeg().await;
    let extracted = postprocess::audio::extract_mp3(&video.file_path, &mp3_path).await;
    if slot_taken {
        state.slots.release_ffmpeg().await;
    }
    if let Err(e) = extracted {
        log::warn!("Audio extraction failed: {}", e);
        return None;
    }

    match send::send_audio_file(bot, chat_id, &mp3_path, &video.info.title, &video.info.author).await {
        Ok((message, _upload_ms)) => {
            let audio_id = message.audio().map(|a| a.file.id.0.clone());
            state
                .telemetry
                .log_action(
                    user_id,
                    Action::AudioExtracted,
                    serde_json::json!({
                        "platform": video.info.platform,
                        "total_ms": request_started.elapsed().as_millis() as u64,
                    }),
                    None,
                    Measurements::default(),
                )
                .await;
            audio_id
        }
        Err(e) => {
            log::warn!("Audio follow-up send failed: {}", e);
            None
        }
    }
}
