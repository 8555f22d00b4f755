//! Append-only action telemetry (PostgreSQL `action_logs`).
//!
//! One row per terminal outcome. The `details` column is a JSON bag; every
//! action writes a typed struct serialized at insert time, so the field set
//! per action stays enumerable. Rows are immutable once written.

use crate::core::config;
use crate::core::error::AppResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Action kinds recorded in `action_logs.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DownloadRequest,
    DownloadSuccess,
    DownloadError,
    FlyerAdShown,
    FlyerSubCompleted,
    AudioExtracted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::DownloadRequest => "download_request",
            Action::DownloadSuccess => "download_success",
            Action::DownloadError => "download_error",
            Action::FlyerAdShown => "flyer_ad_shown",
            Action::FlyerSubCompleted => "flyer_sub_completed",
            Action::AudioExtracted => "audio_extracted",
        }
    }
}

/// Details bag for a successful delivery.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SuccessDetails {
    pub platform: String,
    pub bucket: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub prep_ms: u64,
    pub download_ms: u64,
    pub upload_ms: u64,
    pub total_ms: u64,
    pub download_host: String,
    pub flyer_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_video: Option<bool>,
}

/// Details bag for a failed request (whole chain exhausted or delivery
/// impossible).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    pub platform: String,
    pub bucket: String,
    pub error: String,
    pub error_class: String,
    pub providers_tried: Vec<String>,
    /// provider name -> error class
    pub provider_errors: BTreeMap<String, String>,
}

/// Extra numeric columns that ride next to the details JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Measurements {
    pub download_time_ms: Option<i64>,
    pub file_size_bytes: Option<i64>,
    pub download_speed_kbps: Option<i64>,
}

/// Registration info used by the monetization gate.
#[derive(Debug, Clone)]
pub struct UserStats {
    pub created_at: DateTime<Utc>,
    pub total_downloads: u64,
    pub youtube_full_count: u64,
    pub instagram_count: u64,
}

impl UserStats {
    pub fn days_since_registration(&self) -> u64 {
        (Utc::now() - self.created_at).num_days().max(0) as u64
    }
}

/// Handle over the telemetry store. With no DATABASE_URL configured every
/// write becomes a logged no-op so the bot keeps serving downloads.
#[derive(Clone)]
pub struct Telemetry {
    pool: Option<PgPool>,
}

impl Telemetry {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        if database_url.is_empty() {
            log::warn!("DATABASE_URL not set; telemetry writes disabled");
            return Ok(Self { pool: None });
        }
        let pool = PgPoolOptions::new().max_connections(5).connect(database_url).await?;
        log::info!("Connected to PostgreSQL");
        Ok(Self { pool: Some(pool) })
    }

    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Appends one row. Failures are logged and swallowed: telemetry must
    /// never take a download down with it.
    pub async fn log_action(
        &self,
        user_id: i64,
        action: Action,
        details: serde_json::Value,
        api_source: Option<&str>,
        measurements: Measurements,
    ) {
        let Some(pool) = &self.pool else {
            log::debug!("telemetry disabled, skip action={} user={}", action.as_str(), user_id);
            return;
        };

        let result = sqlx::query(
            "INSERT INTO action_logs \
             (user_id, bot_id, action, details, api_source, download_time_ms, file_size_bytes, download_speed_kbps, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
        )
        .bind(user_id)
        .bind(*config::BOT_ID)
        .bind(action.as_str())
        .bind(&details)
        .bind(api_source)
        .bind(measurements.download_time_ms)
        .bind(measurements.file_size_bytes)
        .bind(measurements.download_speed_kbps)
        .execute(pool)
        .await;

        match result {
            Ok(_) => log::debug!("Action logged: user={}, action={}", user_id, action.as_str()),
            Err(e) => log::error!("Action log error: {}", e),
        }
    }

    /// Loads the per-user counters the gate policy needs. A missing user or
    /// a dead store reads as a brand-new account (which the gate treats as
    /// free), so this is fail-open too.
    pub async fn user_stats(&self, user_id: i64) -> UserStats {
        let fresh = UserStats {
            created_at: Utc::now(),
            total_downloads: 0,
            youtube_full_count: 0,
            instagram_count: 0,
        };
        let Some(pool) = &self.pool else { return fresh };

        let created_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM users WHERE telegram_id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("user_stats created_at query error: {}", e);
                    None
                });

        let total_downloads = self
            .count_success(pool, user_id, None, None)
            .await;
        // Old rows carry platform=youtube without a bucket; count them as full
        let youtube_full_count = self
            .count_success(pool, user_id, Some("youtube"), Some("full"))
            .await;
        let instagram_count = self
            .count_success(pool, user_id, Some("instagram"), None)
            .await;

        UserStats {
            created_at: created_at.unwrap_or_else(Utc::now),
            total_downloads,
            youtube_full_count,
            instagram_count,
        }
    }

    async fn count_success(&self, pool: &PgPool, user_id: i64, platform: Option<&str>, bucket: Option<&str>) -> u64 {
        let mut sql = String::from(
            "SELECT COUNT(*) FROM action_logs WHERE user_id = $1 AND action = 'download_success'",
        );
        if platform.is_some() {
            sql.push_str(" AND details->>'platform' = $2");
        }
        if bucket.is_some() {
            sql.push_str(" AND (details->>'bucket' = $3 OR details->>'bucket' IS NULL)");
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(user_id);
        if let Some(p) = platform {
            query = query.bind(p);
        }
        if let Some(b) = bucket {
            query = query.bind(b);
        }

        match query.fetch_one(pool).await {
            Ok(n) => n.max(0) as u64,
            Err(e) => {
                log::warn!("user_stats count query error: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_action_names() {
        assert_eq!(Action::DownloadSuccess.as_str(), "download_success");
        assert_eq!(Action::FlyerAdShown.as_str(), "flyer_ad_shown");
        assert_eq!(Action::AudioExtracted.as_str(), "audio_extracted");
    }

    #[test]
    fn test_success_details_serialization_skips_empty_options() {
        let details = SuccessDetails {
            platform: "youtube".into(),
            bucket: "shorts".into(),
            media_type: "video".into(),
            prep_ms: 120,
            download_ms: 4000,
            upload_ms: 380,
            total_ms: 4500,
            download_host: "rr4---sn-4g5e6nsz.googlevideo.com".into(),
            flyer_required: false,
            quota: None,
            files_count: None,
            has_video: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["total_ms"], 4500);
        assert!(json.get("quota").is_none());
        assert!(json.get("files_count").is_none());
    }

    #[test]
    fn test_error_details_serialization() {
        let mut provider_errors = BTreeMap::new();
        provider_errors.insert("ytdlp".to_string(), "HARD_KILL".to_string());
        provider_errors.insert("pytubefix".to_string(), "STALL".to_string());
        let details = ErrorDetails {
            platform: "youtube".into(),
            bucket: "full".into(),
            error: "HTTP Error 403 forbidden".into(),
            error_class: "HARD_KILL".into(),
            providers_tried: vec!["ytdlp".into(), "pytubefix".into()],
            provider_errors,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["error_class"], "HARD_KILL");
        assert_eq!(json["providers_tried"].as_array().unwrap().len(), 2);
        assert_eq!(json["provider_errors"]["pytubefix"], "STALL");
    }

    #[test]
    fn test_user_stats_days() {
        let stats = UserStats {
            created_at: Utc::now() - chrono::Duration::days(5),
            total_downloads: 0,
            youtube_full_count: 0,
            instagram_count: 0,
        };
        assert_eq!(stats.days_since_registration(), 5);
    }
}
