//! Stream scheduler and retrain loop.
//!
//! Every stream runs on its own tokio task with its own interval timer.
//! The cycle is awaited inline inside the loop, so a stream can never run
//! two cycles at once. Ticks that come due while a cycle is still running
//! are dropped: the next cycle starts on the next interval boundary, not
//! the moment the slow one ends. Streams share nothing but the artifact directory, the
//! prediction store and the notifier.
//!
//! A separate task retrains every stream on a long interval. Streams are
//! retrained concurrently and a failure on one does not affect the rest.
//! Shutdown is cooperative: the loops stop taking ticks and any cycle or
//! retrain already in flight runs to completion.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cycle::StreamWorker;

/// Upper bound on how late a tick may fire and still start a cycle.
const LATE_TICK_SLACK: Duration = Duration::from_millis(500);
use crate::types::{StreamId, TrainingOutcome};

/// When the whole-system retrain runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainPolicy {
    pub interval: Duration,
    /// Retrain once immediately when the scheduler starts.
    pub on_startup: bool,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            on_startup: false,
        }
    }
}

pub struct Scheduler {
    workers: Vec<Arc<StreamWorker>>,
    retrain: RetrainPolicy,
}

impl Scheduler {
    pub fn new(workers: Vec<Arc<StreamWorker>>, retrain: RetrainPolicy) -> Self {
        Self { workers, retrain }
    }

    /// Spawn one loop per stream plus the retrain loop.
    pub fn start(self) -> SchedulerHandle {
        let (tx, rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.workers.len() + 1);

        for worker in &self.workers {
            info!(
                stream = %worker.stream().id,
                endpoint = %worker.stream().endpoint,
                interval_secs = worker.stream().interval_secs,
                "Stream loop starting"
            );
            tasks.push(tokio::spawn(stream_loop(worker.clone(), rx.clone())));
        }
        tasks.push(tokio::spawn(retrain_loop(self.workers, self.retrain, rx)));

        SchedulerHandle { shutdown: tx, tasks }
    }
}

/// Owner of the running loops.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every loop to stop and wait for in-flight work to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Whether a tick scheduled for `deadline` fired too late to be run.
/// `Skip` still yields one missed tick right after a long cycle; that tick
/// is stale and dropped so the stream realigns to its interval grid.
pub(crate) fn is_stale_tick(deadline: Instant, now: Instant, period: Duration) -> bool {
    now.saturating_duration_since(deadline) > (period / 2).min(LATE_TICK_SLACK)
}

async fn stream_loop(worker: Arc<StreamWorker>, mut shutdown: watch::Receiver<bool>) {
    let period = worker.stream().interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            deadline = ticker.tick() => {
                if is_stale_tick(deadline, Instant::now(), period) {
                    debug!(stream = %worker.stream().id, "Tick came due during a running cycle, dropped");
                    continue;
                }
                worker.run_cycle().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(stream = %worker.stream().id, "Stream loop stopped");
}

async fn retrain_loop(
    workers: Vec<Arc<StreamWorker>>,
    policy: RetrainPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    if policy.on_startup {
        retrain_all(&workers).await;
    }

    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                retrain_all(&workers).await;
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Retrain loop stopped");
}

/// Retrain every stream concurrently. Each stream's outcome is reported
/// on its own; one failing never stops the others.
pub async fn retrain_all(workers: &[Arc<StreamWorker>]) -> Vec<(StreamId, TrainingOutcome)> {
    info!(streams = workers.len(), "Retraining all models");

    let runs = workers.iter().map(|w| async move {
        let outcome = w.forecaster().retrain().await;
        w.status().record_retrain(&w.stream().id, &outcome).await;
        if outcome.success {
            info!(stream = %w.stream().id, result = %outcome, "Retrain finished");
        } else {
            warn!(stream = %w.stream().id, result = %outcome, "Retrain failed, previous model kept");
        }
        (w.stream().id.clone(), outcome)
    });
    let results = join_all(runs).await;

    let succeeded = results.iter().filter(|(_, o)| o.success).count();
    info!(succeeded, total = results.len(), "Retrain pass complete");
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_time_tick_is_not_stale() {
        let now = Instant::now();
        assert!(!is_stale_tick(now, now, Duration::from_secs(10)));
        assert!(!is_stale_tick(now, now + Duration::from_millis(200), Duration::from_secs(10)));
    }

    #[test]
    fn test_tick_missed_during_long_cycle_is_stale() {
        let start = Instant::now();
        // Deadline at 10s, fired at 25s after a 25s cycle.
        let deadline = start + Duration::from_secs(10);
        assert!(is_stale_tick(deadline, start + Duration::from_secs(25), Duration::from_secs(10)));
        // Only 2s late on a 10s stream is still stale.
        assert!(is_stale_tick(deadline, deadline + Duration::from_secs(2), Duration::from_secs(10)));
    }

    #[test]
    fn test_slack_scales_down_for_short_intervals() {
        let deadline = Instant::now();
        let period = Duration::from_millis(400);
        assert!(!is_stale_tick(deadline, deadline + Duration::from_millis(150), period));
        assert!(is_stale_tick(deadline, deadline + Duration::from_millis(250), period));
    }
}
