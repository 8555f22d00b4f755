//! Concurrency admission: per-user download slots, the global ffmpeg slot
//! and the observability gauges.
//!
//! All counters live in Redis with a TTL bound so a crashed process cannot
//! leak a slot forever. Enforcement is cooperative: no lock is held for the
//! duration of an operation, and a broken store never blocks work.

use crate::core::config::slots;
use crate::storage::kv::Kv;

#[derive(Clone)]
pub struct SlotController {
    kv: Kv,
}

impl SlotController {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    fn user_key(user_id: i64) -> String {
        format!("downloads:user:{}", user_id)
    }

    /// Tries to take a download slot for the user (cap 2).
    ///
    /// Returns `false` when the user is already at the cap: the increment is
    /// reverted and the request must be rejected before any work starts.
    /// Store failures allow the download (fail-open).
    pub async fn acquire_user(&self, user_id: i64) -> bool {
        let key = Self::user_key(user_id);
        match self.kv.incr(&key).await {
            Ok(value) => {
                let _ = self.kv.expire(&key, slots::USER_TTL_SECS).await;
                if value as u64 > *slots::USER_CAP {
                    let _ = self.kv.decr(&key).await;
                    log::info!("User {} at download cap ({})", user_id, *slots::USER_CAP);
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                log::warn!("User slot acquire error for {}: {} (allowing)", user_id, e);
                true
            }
        }
    }

    pub async fn release_user(&self, user_id: i64) {
        let key = Self::user_key(user_id);
        match self.kv.decr(&key).await {
            Ok(value) if value < 0 => {
                // Counter expired mid-request; clamp instead of going negative
                let _ = self.kv.set(&key, "0").await;
            }
            Ok(_) => {}
            Err(e) => log::warn!("User slot release error for {}: {}", user_id, e),
        }
    }

    /// Advisory ffmpeg slot (cap 5). Returns whether a slot was actually
    /// taken; the caller proceeds either way but only releases what it took.
    pub async fn acquire_ffmpeg(&self) -> bool {
        match self.kv.incr("ffmpeg:active").await {
            Ok(value) => {
                let _ = self.kv.expire("ffmpeg:active", slots::FFMPEG_TTL_SECS).await;
                if value as u64 > *slots::FFMPEG_CAP {
                    let _ = self.kv.decr("ffmpeg:active").await;
                    log::warn!("ffmpeg slot cap reached ({}), continuing unthrottled", *slots::FFMPEG_CAP);
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                log::warn!("ffmpeg slot acquire error: {} (continuing)", e);
                false
            }
        }
    }

    pub async fn release_ffmpeg(&self) {
        if let Ok(value) = self.kv.decr("ffmpeg:active").await {
            if value < 0 {
                let _ = self.kv.set("ffmpeg:active", "0").await;
            }
        }
    }

    pub async fn incr_active_downloads(&self) {
        self.incr_gauge("counter:active_downloads").await;
    }

    pub async fn decr_active_downloads(&self) {
        self.decr_gauge("counter:active_downloads").await;
    }

    pub async fn incr_active_uploads(&self) {
        self.incr_gauge("counter:active_uploads").await;
    }

    pub async fn decr_active_uploads(&self) {
        self.decr_gauge("counter:active_uploads").await;
    }

    async fn incr_gauge(&self, key: &str) {
        if self.kv.incr(key).await.is_ok() {
            let _ = self.kv.expire(key, slots::COUNTER_TTL_SECS).await;
        }
    }

    async fn decr_gauge(&self, key: &str) {
        if let Ok(value) = self.kv.decr(key).await {
            if value < 0 {
                let _ = self.kv.set(key, "0").await;
            }
        }
    }
}
