//! Cooperative progress updater.
//!
//! One task per request. It collects provider progress snapshots and once a
//! minute rewrites the status message: with byte counts when the provider
//! reports them, with a plain "still working" line otherwise. A oneshot
//! signal shuts it down when the request terminates either way.

use crate::core::config;
use crate::providers::ProgressUpdate;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::{mpsc, oneshot};

/// Handle owned by the request task; dropping or finishing it stops the
/// updater.
pub struct ProgressHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ProgressHandle {
    /// Stops the ticker. Safe to call once the request has reached a
    /// terminal state.
    pub async fn finish(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = self.task.await;
    }
}

fn format_tick(minutes: u64, latest: Option<ProgressUpdate>) -> String {
    match latest {
        Some(update) if update.total_bytes.is_some() => {
            let done_mb = update.downloaded_bytes as f64 / (1024.0 * 1024.0);
            let total_mb = update.total_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0);
            format!("⏳ Скачиваю... {} мин, {:.1} МБ / {:.1} МБ", minutes, done_mb, total_mb)
        }
        _ => format!("⏳ Скачиваю... {} мин, подожди немного", minutes),
    }
}

/// Spawns the updater editing `message_id` in `chat_id` every 60 seconds.
pub fn spawn_updater(
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    mut progress_rx: mpsc::UnboundedReceiver<ProgressUpdate>,
) -> ProgressHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut latest: Option<ProgressUpdate> = None;
        let mut minutes: u64 = 0;
        let mut rx_closed = false;
        let mut ticker = tokio::time::interval(config::progress::tick());
        // the immediate first tick would edit the message right after it
        // was sent; skip it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => break,
                update = progress_rx.recv(), if !rx_closed => {
                    match update {
                        Some(u) => latest = Some(u),
                        // provider side dropped; keep ticking on elapsed time
                        None => rx_closed = true,
                    }
                }
                _ = ticker.tick() => {
                    minutes += 1;
                    let text = format_tick(minutes, latest);
                    if let Err(e) = bot.edit_message_text(chat_id, message_id, &text).await {
                        // "message is not modified" and similar are expected noise
                        log::debug!("Progress edit failed: {}", e);
                    }
                }
            }
        }
    });

    ProgressHandle { cancel: Some(cancel_tx), task }
}
