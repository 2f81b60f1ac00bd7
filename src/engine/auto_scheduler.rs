use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::scheduler::{begin_pass, SchedulingPhase};
use crate::models::trip::TripStatus;
use crate::state::{AppState, SharedTrip};

#[derive(Debug, Default)]
struct SweepCounters {
    total_runs: u64,
    total_passes: u64,
    last_run_passes: usize,
    last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoSchedulerStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub total_runs: u64,
    pub total_passes: u64,
    pub last_run_passes: usize,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Periodically re-runs scheduling for deadheading trips that are not
/// already matched or waiting on a pass.
pub struct AutoScheduler {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    counters: Mutex<SweepCounters>,
}

impl AutoScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: Mutex::new(None),
            counters: Mutex::new(SweepCounters::default()),
        }
    }

    pub async fn status(&self) -> AutoSchedulerStatus {
        let running = self
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        let counters = self.counters.lock().await;

        AutoSchedulerStatus {
            running,
            interval_ms: self.interval.as_millis() as u64,
            total_runs: counters.total_runs,
            total_passes: counters.total_passes,
            last_run_passes: counters.last_run_passes,
            last_run_at: counters.last_run_at,
        }
    }

    /// Stops the sweep loop. Returns false when it was not running.
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.task.lock().await.take() else {
            return false;
        };
        let was_running = !handle.is_finished();
        handle.abort();
        if was_running {
            info!("auto scheduler stopped");
        }
        was_running
    }
}

impl Drop for AutoScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Starts the sweep loop. The first sweep runs immediately. Returns false
/// when the loop was already running.
pub async fn start(state: &Arc<AppState>) -> bool {
    let mut task = state.auto_scheduler.task.lock().await;
    if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
        debug!("auto scheduler already running");
        return false;
    }

    let period = state.auto_scheduler.interval;
    *task = Some(tokio::spawn(run(Arc::downgrade(state), period)));

    info!(interval_ms = period.as_millis() as u64, "auto scheduler started");
    true
}

// Holds only a weak reference so the loop never keeps the state alive.
async fn run(state: Weak<AppState>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };
        sweep(&state).await;
    }
}

/// Runs one sweep and returns how many scheduling passes it started.
pub async fn sweep(state: &Arc<AppState>) -> usize {
    let trips: Vec<SharedTrip> = state
        .trips
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut passes = 0;
    for shared in trips {
        // A trip busy with a request is left for the next sweep.
        let Ok(mut record) = shared.try_lock() else {
            continue;
        };
        let eligible = record.trip.status == TripStatus::Deadheading
            && matches!(
                record.scheduling.phase(),
                SchedulingPhase::Idle | SchedulingPhase::ManualSelectionRequired
            );
        if !eligible {
            continue;
        }

        match begin_pass(state, &mut record).await {
            Ok(_) => passes += 1,
            Err(err) => warn!(trip_id = %record.trip.id, error = %err, "sweep could not start a pass"),
        }
    }

    {
        let mut counters = state.auto_scheduler.counters.lock().await;
        counters.total_runs += 1;
        counters.total_passes += passes as u64;
        counters.last_run_passes = passes;
        counters.last_run_at = Some(Utc::now());
    }
    state.metrics.auto_scheduler_sweeps_total.inc();

    info!(passes, "auto scheduler sweep finished");
    passes
}
