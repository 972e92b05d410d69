//! Host and runtime resource snapshot.
//!
//! Purely informational. Each source that fails leaves its fields `None`;
//! taking a snapshot never fails.

use crate::adapters::ContainerRuntime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::{debug, instrument, warn};

/// Point-in-time resource usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub containers_total: Option<u64>,
    pub containers_running: Option<u64>,
    pub containers_stopped: Option<u64>,
    pub images: Option<u64>,
    pub volumes: Option<u64>,
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
}

#[derive(Debug, Default)]
struct HostUsage {
    memory: Option<(u64, u64)>,
    disk: Option<(u64, u64)>,
}

/// Read-only resource monitor.
#[derive(Clone)]
pub struct ResourceMonitor {
    runtime: Arc<dyn ContainerRuntime>,

    /// Disk usage is reported for the filesystem holding this path
    disk_path: PathBuf,
}

impl ResourceMonitor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, disk_path: impl Into<PathBuf>) -> Self {
        Self { runtime, disk_path: disk_path.into() }
    }

    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> ResourceSnapshot {
        let mut snapshot = ResourceSnapshot::default();

        match self.runtime.info().await {
            Ok(info) => {
                snapshot.containers_total = Some(info.containers);
                snapshot.containers_running = Some(info.containers_running);
                snapshot.containers_stopped = Some(info.containers_stopped);
                snapshot.images = Some(info.images);
                snapshot.volumes = info.volumes;
            }
            Err(e) => warn!(error = %e, "Runtime info unavailable"),
        }

        let disk_path = self.disk_path.clone();
        match tokio::task::spawn_blocking(move || host_usage(&disk_path)).await {
            Ok(host) => {
                if let Some((used, total)) = host.memory {
                    snapshot.memory_used_bytes = Some(used);
                    snapshot.memory_total_bytes = Some(total);
                }
                if let Some((used, total)) = host.disk {
                    snapshot.disk_used_bytes = Some(used);
                    snapshot.disk_total_bytes = Some(total);
                }
            }
            Err(e) => warn!(error = %e, "Host usage collection failed"),
        }

        debug!(?snapshot, "Resource snapshot");
        snapshot
    }
}

fn host_usage(disk_path: &Path) -> HostUsage {
    let mut sys = System::new();
    sys.refresh_memory();
    let memory = Some((sys.used_memory(), sys.total_memory())).filter(|(_, total)| *total > 0);

    // Deepest mount point containing the path
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| disk_path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().components().count())
        .map(|d| (d.total_space().saturating_sub(d.available_space()), d.total_space()))
        .filter(|(_, total)| *total > 0);

    HostUsage { memory, disk }
}

/// `1.5 GiB`, or `-` when unknown.
pub fn format_bytes(bytes: Option<u64>) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let Some(bytes) = bytes else {
        return "-".to_string();
    };

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockRuntime;

    #[tokio::test]
    async fn test_snapshot_with_runtime() {
        let monitor = ResourceMonitor::new(Arc::new(MockRuntime::new()), "/");
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.containers_total, Some(0));
        assert_eq!(snapshot.volumes, Some(0));
    }

    #[tokio::test]
    async fn test_runtime_failure_degrades_to_unknown() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_unavailable(true);
        let snapshot = ResourceMonitor::new(runtime, "/").snapshot().await;
        assert_eq!(snapshot.containers_total, None);
        assert_eq!(snapshot.images, None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(None), "-");
        assert_eq!(format_bytes(Some(512)), "512 B");
        assert_eq!(format_bytes(Some(1536)), "1.5 KiB");
        assert_eq!(format_bytes(Some(8 * 1024 * 1024 * 1024)), "8.0 GiB");
    }
}
