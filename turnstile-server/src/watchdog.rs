//! Per-stream activity watchdog.
//!
//! Detects a stalled stream without killing a legitimately slow one: the
//! monitor cancels its token when no chunk has arrived for the activity
//! timeout, or when the stream has run past the hard total cap. The cause
//! of a cancellation stays queryable so the orchestrator can tell the
//! client exactly what happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use turnstile_core::config::StreamConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// No chunk arrived for longer than the activity timeout.
    Activity { idle: Duration },
    /// The stream ran past the hard total cap.
    Total { elapsed: Duration },
}

impl CancelCause {
    pub fn message(&self) -> String {
        match self {
            CancelCause::Activity { idle } => {
                format!("stream activity timeout: {}s without data", idle.as_secs())
            }
            CancelCause::Total { elapsed } => {
                format!("stream total timeout: running for {}m", elapsed.as_secs() / 60)
            }
        }
    }
}

pub struct ActivityMonitor {
    started: Instant,
    /// Milliseconds since `started` of the last observed activity.
    last_activity_ms: Arc<AtomicU64>,
    activity_timeout: Duration,
    max_total_timeout: Duration,
    poll_interval: Duration,
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl ActivityMonitor {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: Arc::new(AtomicU64::new(0)),
            activity_timeout: Duration::from_secs(config.activity_timeout_secs),
            max_total_timeout: Duration::from_secs(config.max_total_timeout_secs),
            poll_interval: POLL_INTERVAL,
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resets the activity clock. Called on every chunk; lock-free.
    pub fn update_activity(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Release);
    }

    /// Token cancelled when either timeout predicate fires (or on `stop`).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Why the monitor cancelled; `None` when it was stopped externally.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    /// Spawns the poller. Checks both predicates every poll tick and
    /// cancels on the first that holds.
    pub fn start(&self) {
        let started = self.started;
        let last_activity_ms = self.last_activity_ms.clone();
        let activity_timeout = self.activity_timeout;
        let max_total_timeout = self.max_total_timeout;
        let poll_interval = self.poll_interval;
        let token = self.token.clone();
        let cause = self.cause.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        let elapsed = started.elapsed();
                        let last = Duration::from_millis(last_activity_ms.load(Ordering::Acquire));
                        let idle = elapsed.saturating_sub(last);

                        if idle > activity_timeout {
                            let _ = cause.set(CancelCause::Activity { idle });
                            token.cancel();
                            return;
                        }
                        if elapsed > max_total_timeout {
                            let _ = cause.set(CancelCause::Total { elapsed });
                            token.cancel();
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Cancels the token and releases the poller. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(activity_secs: u64, total_secs: u64) -> StreamConfig {
        StreamConfig {
            initial_timeout_secs: 120,
            activity_timeout_secs: activity_secs,
            max_total_timeout_secs: total_secs,
        }
    }

    #[tokio::test]
    async fn cancels_on_idle_stream() {
        let monitor = ActivityMonitor::new(&config(0, 3600))
            .with_poll_interval(Duration::from_millis(10));
        monitor.start();

        tokio::time::timeout(Duration::from_secs(2), monitor.token().cancelled())
            .await
            .expect("monitor should cancel an idle stream");

        assert!(matches!(
            monitor.cancel_cause(),
            Some(CancelCause::Activity { .. })
        ));
    }

    #[tokio::test]
    async fn activity_refresh_keeps_stream_alive_until_hard_cap() {
        // Activity refreshed faster than the activity timeout: only the
        // total cap can fire.
        let monitor = ActivityMonitor::new(&config(3600, 0))
            .with_poll_interval(Duration::from_millis(10));
        monitor.update_activity();
        monitor.start();

        tokio::time::timeout(Duration::from_secs(2), monitor.token().cancelled())
            .await
            .expect("monitor should cancel at the hard cap");

        assert!(matches!(
            monitor.cancel_cause(),
            Some(CancelCause::Total { .. })
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_leaves_no_cause() {
        let monitor = ActivityMonitor::new(&config(30, 1800));
        monitor.start();
        monitor.stop();
        monitor.stop();
        monitor.token().cancelled().await;
        assert_eq!(monitor.cancel_cause(), None);
    }

    #[tokio::test]
    async fn frequent_updates_prevent_activity_cancel() {
        let monitor = ActivityMonitor::new(&config(1, 3600))
            .with_poll_interval(Duration::from_millis(10));
        monitor.start();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            monitor.update_activity();
        }
        assert!(!monitor.token().is_cancelled());
        monitor.stop();
    }

    #[test]
    fn cause_messages_identify_the_predicate() {
        let activity = CancelCause::Activity {
            idle: Duration::from_secs(35),
        };
        assert!(activity.message().starts_with("stream activity timeout"));

        let total = CancelCause::Total {
            elapsed: Duration::from_secs(1860),
        };
        assert!(total.message().starts_with("stream total timeout"));
        assert!(total.message().contains("31m"));
    }
}
