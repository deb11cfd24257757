//! Auto-delete sweeper
//!
//! A background task that periodically removes fetched files whose
//! auto-delete time has passed, and removes every registered file when the
//! daemon shuts down.

pub mod registry;

pub use registry::{AutoDeleteRegistry, SweepReport};

use chrono::Utc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Handle to a running sweeper task
pub struct SweeperHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<SweepReport>,
}

impl SweeperHandle {
    /// Ask the sweeper to stop and wait for its final forced sweep.
    ///
    /// Returns the report of that final sweep.
    pub async fn stop(self) -> SweepReport {
        let _ = self.stop_tx.send(());
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Sweeper task failed: {}", e);
                SweepReport::default()
            }
        }
    }
}

/// Start the sweeper on the current runtime.
///
/// Expired entries are swept every `interval`. A zero interval is not
/// accepted by the configuration layer.
pub fn spawn(registry: AutoDeleteRegistry, interval: Duration) -> SweeperHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(run(registry, interval, stop_rx));
    SweeperHandle { stop_tx, task }
}

async fn run(
    registry: AutoDeleteRegistry,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> SweepReport {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("Sweeper started (interval {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sweep_registry = registry.clone();
                let swept =
                    tokio::task::spawn_blocking(move || sweep_registry.sweep(Utc::now(), false)).await;
                let report = match swept {
                    Ok(report) => report,
                    Err(e) => {
                        error!("Sweep task failed: {}", e);
                        SweepReport::default()
                    }
                };
                if report.total() > 0 {
                    debug!("Sweep removed {} expired entries", report.total());
                }
            }
            // A dropped handle counts as a stop request
            _ = &mut stop_rx => break,
        }
    }

    let swept = tokio::task::spawn_blocking(move || registry.sweep(Utc::now(), true)).await;
    let report = match swept {
        Ok(report) => report,
        Err(e) => {
            error!("Final sweep failed: {}", e);
            SweepReport::default()
        }
    };
    info!(
        "Sweeper stopped; {} registered file(s) removed on shutdown",
        report.deleted.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[tokio::test]
    async fn test_tick_removes_expired_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = touch(&temp_dir, "soon");

        let registry = AutoDeleteRegistry::new();
        registry.register(&path, Duration::from_millis(10));

        let handle = spawn(registry.clone(), Duration::from_millis(50));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while path.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!path.exists());
        assert!(registry.is_empty());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_forces_final_sweep() {
        let temp_dir = TempDir::new().unwrap();
        let a = touch(&temp_dir, "a");
        let b = touch(&temp_dir, "b");

        let registry = AutoDeleteRegistry::new();
        registry.register(&a, Duration::from_secs(3600));
        registry.register(&b, Duration::from_secs(3600));

        let handle = spawn(registry.clone(), Duration::from_secs(3600));
        let report = handle.stop().await;

        assert_eq!(report.deleted.len(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_final_sweep_runs_off_the_async_worker() {
        let temp_dir = TempDir::new().unwrap();
        let path = touch(&temp_dir, "pending");

        let registry = AutoDeleteRegistry::new();
        registry.register(&path, Duration::from_secs(3600));

        // Holding the lock on this worker must not stall the forced sweep
        let guard = registry.lock();
        let handle = spawn(registry.clone(), Duration::from_secs(3600));
        let stop = tokio::spawn(handle.stop());
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let report = tokio::time::timeout(Duration::from_secs(5), stop)
            .await
            .expect("final sweep should finish")
            .unwrap();
        assert_eq!(report.deleted, vec![path.clone()]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unexpired_file_survives_ticks() {
        let temp_dir = TempDir::new().unwrap();
        let path = touch(&temp_dir, "later");

        let registry = AutoDeleteRegistry::new();
        registry.register(&path, Duration::from_secs(3600));

        let handle = spawn(registry.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(path.exists());
        assert!(registry.contains(&path));
        handle.stop().await;
    }
}
