//! Hang watchdog module
//!
//! Polls [`RunProgress`](crate::progress::RunProgress) and raises an advisory
//! alert when no job has completed for longer than the hang timeout. It never
//! touches scheduling.

use crate::notify::AlertSink;
use crate::progress::SharedProgress;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::warn;

pub const ALERT_TITLE: &str = "Image Squisher";

/// Longest pause between two polls.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a stall alert is due.
///
/// A stall starts when `now - last_progress` exceeds `hang_timeout`. The first
/// alert of a stall fires immediately; while the stall continues, another
/// fires each time a full `hang_timeout` has passed since the previous one.
pub fn should_alert(
    now: Instant,
    last_progress: Instant,
    last_alert: Option<Instant>,
    hang_timeout: Duration,
) -> bool {
    if now.saturating_duration_since(last_progress) <= hang_timeout {
        return false;
    }
    match last_alert {
        Some(alerted) if alerted >= last_progress => {
            now.saturating_duration_since(alerted) >= hang_timeout
        }
        _ => true,
    }
}

/// Poll interval for a given hang timeout.
pub fn poll_interval(hang_timeout: Duration) -> Duration {
    hang_timeout.min(MAX_POLL_INTERVAL).max(Duration::from_millis(10))
}

/// Passive stall monitor over the shared run progress.
pub struct HangWatchdog {
    progress: SharedProgress,
    hang_timeout: Duration,
    sink: Arc<dyn AlertSink>,
}

/// A running watchdog. Stopping it returns the number of alerts raised.
pub struct WatchdogHandle {
    stop: Arc<Notify>,
    task: JoinHandle<u32>,
}

impl HangWatchdog {
    pub fn new(progress: SharedProgress, hang_timeout: Duration, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            progress,
            hang_timeout,
            sink,
        }
    }

    pub fn spawn(self) -> WatchdogHandle {
        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(stop.clone()));
        WatchdogHandle { stop, task }
    }

    async fn run(self, stop: Arc<Notify>) -> u32 {
        let interval = poll_interval(self.hang_timeout);
        let mut last_alert: Option<Instant> = None;
        let mut alerts = 0u32;

        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let (last_progress, completed, total, active, finished, last_completed) = {
                let p = self.progress.read().await;
                (
                    p.last_progress,
                    p.completed_count,
                    p.total_count,
                    p.active_count,
                    p.finished,
                    p.last_completed.clone(),
                )
            };
            if finished {
                break;
            }

            let now = Instant::now();
            if should_alert(now, last_progress, last_alert, self.hang_timeout) {
                let stalled = now.saturating_duration_since(last_progress);
                let mut message = format!(
                    "No image finished in {}s ({}/{} done, {} in progress)",
                    stalled.as_secs(),
                    completed,
                    total,
                    active
                );
                if let Some(path) = &last_completed {
                    message.push_str(&format!("; last finished: {}", path.display()));
                }
                warn!(stalled_secs = stalled.as_secs(), completed, total, "{}", message);
                self.sink.alert(ALERT_TITLE, &message);
                last_alert = Some(now);
                alerts += 1;
            }
        }

        alerts
    }
}

impl WatchdogHandle {
    /// Stop monitoring and return how many alerts were raised.
    pub async fn stop(self) -> u32 {
        self.stop.notify_one();
        self.task.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::new_shared_progress;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl AlertSink for Recording {
        fn alert(&self, _title: &str, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_no_alert_within_timeout(
            elapsed_ms in 0u64..=10_000,
            timeout_ms in 10_000u64..=60_000,
        ) {
            let base = Instant::now();
            let now = base + Duration::from_millis(elapsed_ms);
            prop_assert!(!should_alert(now, base, None, Duration::from_millis(timeout_ms)));
        }

        #[test]
        fn prop_first_alert_after_timeout(
            timeout_ms in 1u64..=60_000,
            extra_ms in 1u64..=60_000,
        ) {
            let base = Instant::now();
            let timeout = Duration::from_millis(timeout_ms);
            let now = base + timeout + Duration::from_millis(extra_ms);
            prop_assert!(should_alert(now, base, None, timeout));
        }

        #[test]
        fn prop_realert_needs_full_interval(
            timeout_ms in 1u64..=60_000,
            since_alert_ms in 0u64..=120_000,
        ) {
            let base = Instant::now();
            let timeout = Duration::from_millis(timeout_ms);
            let alerted = base + timeout + Duration::from_millis(1);
            let now = alerted + Duration::from_millis(since_alert_ms);
            prop_assert_eq!(
                should_alert(now, base, Some(alerted), timeout),
                since_alert_ms >= timeout_ms
            );
        }
    }

    #[test]
    fn test_progress_after_alert_rearms() {
        let base = Instant::now();
        let timeout = Duration::from_secs(10);
        let alerted = base + Duration::from_secs(11);
        let progress = base + Duration::from_secs(12);

        assert!(!should_alert(progress + Duration::from_secs(5), progress, Some(alerted), timeout));
        assert!(should_alert(progress + Duration::from_secs(11), progress, Some(alerted), timeout));
    }

    #[test]
    fn test_poll_interval_bounds() {
        assert_eq!(poll_interval(Duration::from_secs(300)), Duration::from_secs(1));
        assert_eq!(poll_interval(Duration::from_millis(200)), Duration::from_millis(200));
        assert_eq!(poll_interval(Duration::ZERO), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_alerts_once_per_interval() {
        let progress = new_shared_progress(5);
        let sink = Arc::new(Recording::default());
        let handle = HangWatchdog::new(progress.clone(), Duration::from_secs(10), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(25_500)).await;
        let alerts = handle.stop().await;

        assert_eq!(alerts, 2);
        let messages = sink.0.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("0/5 done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_alert_names_last_finished_image() {
        let progress = new_shared_progress(3);
        progress
            .write()
            .await
            .job_finished(PathBuf::from("/photos/a.png"));
        let sink = Arc::new(Recording::default());
        let handle = HangWatchdog::new(progress.clone(), Duration::from_secs(10), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(11_500)).await;
        assert_eq!(handle.stop().await, 1);

        let messages = sink.0.lock().unwrap();
        assert!(messages[0].contains("1/3 done"));
        assert!(messages[0].ends_with("last finished: /photos/a.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_progress_never_alerts() {
        let progress = new_shared_progress(10);
        let sink = Arc::new(Recording::default());
        let handle = HangWatchdog::new(progress.clone(), Duration::from_secs(10), sink.clone()).spawn();

        for i in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            progress
                .write()
                .await
                .job_finished(PathBuf::from(format!("/photos/{}.png", i)));
        }
        let alerts = handle.stop().await;

        assert_eq!(alerts, 0);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_run_stops_watchdog() {
        let progress = new_shared_progress(1);
        let sink = Arc::new(Recording::default());
        let handle = HangWatchdog::new(progress.clone(), Duration::from_secs(10), sink.clone()).spawn();

        progress.write().await.finish();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(handle.task.is_finished());
        assert_eq!(handle.stop().await, 0);
    }
}
