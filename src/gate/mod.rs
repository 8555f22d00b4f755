//! Subscription gate (FlyerService).
//!
//! Policy: new accounts and the always-free platforms ride for free; full
//! YouTube videos gate after the free allowance; Instagram gates every Nth
//! download. When proof is required the FlyerService API both checks it and
//! renders its own prompt to the user, so a blocked request ends here with
//! nothing but a telemetry row. Every failure path allows the download —
//! monetization must never break the product.

use crate::core::config;
use crate::intake::{Bucket, Platform};
use crate::storage::Telemetry;
use serde_json::json;
use std::time::Duration;

const FLYER_API_URL: &str = "https://api.flyerservice.io/check";
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// What the gate decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    /// May the download proceed
    pub allowed: bool,
    /// Was a subscription check actually evaluated
    pub flyer_required: bool,
    /// Did the gate service render its task prompt (user not subscribed)
    pub flyer_shown: bool,
}

impl GateOutcome {
    fn free() -> Self {
        Self { allowed: true, flyer_required: false, flyer_shown: false }
    }
}

#[derive(Clone)]
pub struct FlyerGate {
    telemetry: Telemetry,
    http: reqwest::Client,
}

impl FlyerGate {
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry,
            http: reqwest::Client::builder()
                .timeout(CHECK_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Decides whether this (user, content) pair needs subscription proof.
    pub async fn should_check_subscription(&self, user_id: i64, platform: Platform, bucket: Bucket) -> bool {
        let stats = self.telemetry.user_stats(user_id).await;

        if stats.days_since_registration() < *config::gate::FREE_DAYS {
            log::debug!("[FLYER] User {}: free (young account)", user_id);
            return false;
        }
        if stats.total_downloads < *config::gate::FREE_DOWNLOADS {
            log::debug!("[FLYER] User {}: free (download {}/{})", user_id, stats.total_downloads + 1, *config::gate::FREE_DOWNLOADS);
            return false;
        }

        match (platform, bucket) {
            (Platform::Tiktok, _) | (Platform::Pinterest, _) | (Platform::Youtube, Bucket::Shorts) => {
                log::debug!("[FLYER] User {}: free platform", user_id);
                false
            }
            (Platform::Youtube, _) => {
                if stats.youtube_full_count < *config::gate::YOUTUBE_FULL_FREE_COUNT {
                    log::debug!(
                        "[FLYER] User {}: free YT full ({}/{})",
                        user_id,
                        stats.youtube_full_count + 1,
                        *config::gate::YOUTUBE_FULL_FREE_COUNT
                    );
                    false
                } else {
                    log::info!("[FLYER] User {}: CHECK for youtube_full (count={})", user_id, stats.youtube_full_count);
                    true
                }
            }
            (Platform::Instagram, _) => {
                let every = (*config::gate::INSTAGRAM_CHECK_EVERY).max(1);
                let next = stats.instagram_count + 1;
                if next % every == 0 {
                    log::info!("[FLYER] User {}: CHECK for instagram (count={}, every {})", user_id, next, every);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Asks FlyerService whether the user completed the subscription task.
    /// On `false` the service has already shown its own prompt. Any error
    /// (missing key, network, bad payload) allows the download.
    pub async fn check_subscription(&self, user_id: i64, language_code: &str) -> bool {
        if config::FLYER_API_KEY.is_empty() {
            log::warn!("[FLYER] User {}: no API key, SKIP", user_id);
            return true;
        }

        let body = json!({
            "key": &*config::FLYER_API_KEY,
            "user_id": user_id,
            "language_code": language_code,
            "message": {
                "text": "📥 <b>Чтобы скачать видео</b>, подпишись на нашего партнёра\n\n<i>После выполнения отправь ссылку ещё раз</i>",
                "button_bot": "🤖 Запустить",
                "button_channel": "📢 Подписаться",
                "button_fp": "✅ Проверить",
            },
        });

        match self.http.post(FLYER_API_URL).json(&body).send().await {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(data) => {
                    let allowed = data["skip"].as_bool().unwrap_or(true);
                    if allowed {
                        log::info!("[FLYER] User {}: subscribed ✓", user_id);
                    } else {
                        log::info!("[FLYER] User {}: not subscribed, tasks shown", user_id);
                    }
                    allowed
                }
                Err(e) => {
                    log::error!("[FLYER] Response parse error for {}: {}", user_id, e);
                    true
                }
            },
            Err(e) => {
                log::error!("[FLYER] Check error for {}: {}", user_id, e);
                true
            }
        }
    }

    /// Full gate evaluation for one request.
    pub async fn check_and_allow(
        &self,
        user_id: i64,
        platform: Platform,
        bucket: Bucket,
        language_code: &str,
    ) -> GateOutcome {
        if !self.should_check_subscription(user_id, platform, bucket).await {
            return GateOutcome::free();
        }

        let subscribed = self.check_subscription(user_id, language_code).await;
        GateOutcome { allowed: subscribed, flyer_required: true, flyer_shown: !subscribed }
    }
}
