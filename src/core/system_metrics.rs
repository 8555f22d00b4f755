//! Background sampler publishing host gauges into Redis.
//!
//! The admin panel reads `system:*` keys to show load next to the routing
//! controls. Sampling is fail-open: a dead Redis only costs us the gauges.

use crate::core::config;
use crate::storage::kv::Kv;
use std::path::Path;
use sysinfo::{Disks, System};

/// Spawns the sampling loop. Runs for the lifetime of the process.
pub fn spawn(kv: Kv) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = System::new();
        loop {
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let cpu_percent = sys.global_cpu_usage();
            let ram_percent = if sys.total_memory() > 0 {
                sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            let disk_percent = root_disk_usage_percent();
            let tmp_used = dir_size_bytes(Path::new(&*config::DOWNLOAD_DIR));

            let ttl = config::system::GAUGE_TTL_SECS;
            let _ = kv.set_gauge("system:cpu_percent", cpu_percent as f64, ttl).await;
            let _ = kv.set_gauge("system:ram_percent", ram_percent, ttl).await;
            let _ = kv.set_gauge("system:disk_percent", disk_percent, ttl).await;
            let _ = kv.set_gauge("system:tmp_used_bytes", tmp_used as f64, ttl).await;

            log::debug!(
                "[SYSTEM] cpu={:.1}% ram={:.1}% disk={:.1}% tmp={}B",
                cpu_percent,
                ram_percent,
                disk_percent,
                tmp_used
            );

            tokio::time::sleep(config::system::sample_interval()).await;
        }
    })
}

fn root_disk_usage_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    for disk in disks.list() {
        if disk.mount_point() == Path::new("/") {
            let total = disk.total_space();
            if total == 0 {
                return 0.0;
            }
            let used = total.saturating_sub(disk.available_space());
            return used as f64 / total as f64 * 100.0;
        }
    }
    0.0
}

fn dir_size_bytes(dir: &Path) -> u64 {
    let mut total = 0u64;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    total += meta.len();
                }
            }
        }
    }
    total
}
