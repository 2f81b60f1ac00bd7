use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::TripEvent;
use crate::engine::ranking::{rank_loads, LoadRanking, Ranking};
use crate::engine::scoring::{score, VehiclePosition};
use crate::error::{AppError, DispatchError, TransitionError};
use crate::models::assignment::{Assignment, AssignmentMode};
use crate::models::load::Load;
use crate::models::notification::Notification;
use crate::models::trip::{Trip, TripStatus};
use crate::models::vehicle::VehicleStatus;
use crate::state::{AppState, TripRecord};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPhase {
    #[default]
    Idle,
    AwaitingCandidates,
    Polling,
    Assigned,
    ManualSelectionRequired,
}

#[derive(Debug, Default)]
pub struct SchedulingRecord {
    phase: SchedulingPhase,
    history: Vec<SchedulingPhase>,
    recommendations: Option<LoadRanking>,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulingView {
    pub phase: SchedulingPhase,
    pub history: Vec<SchedulingPhase>,
    pub recommendations: Option<LoadRanking>,
}

impl SchedulingRecord {
    pub fn phase(&self) -> SchedulingPhase {
        self.phase
    }

    pub fn history(&self) -> &[SchedulingPhase] {
        &self.history
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            SchedulingPhase::AwaitingCandidates | SchedulingPhase::Polling
        )
    }

    pub fn view(&self) -> SchedulingView {
        SchedulingView {
            phase: self.phase,
            history: self.history.clone(),
            recommendations: self.recommendations.clone(),
        }
    }

    fn enter(&mut self, phase: SchedulingPhase) {
        self.phase = phase;
        self.history.push(phase);
    }

    /// Aborts a pending assignment check. Bumping the generation also turns
    /// a check that already woke up into a no-op.
    pub fn cancel(&mut self) -> bool {
        self.generation += 1;
        let cancelled = match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        if self.in_flight() {
            self.enter(SchedulingPhase::Idle);
        }
        cancelled
    }
}

impl Drop for SchedulingRecord {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

pub fn trip_position(trip: &Trip) -> Option<VehiclePosition> {
    let current = trip.origin.coordinate()?;
    Some(VehiclePosition {
        current,
        destination: trip.destination.coordinate(),
    })
}

/// Requests a scheduling pass for a deadheading trip. A trigger that
/// arrives while a pass is already in flight changes nothing.
pub async fn request_pass(state: &Arc<AppState>, trip_id: Uuid) -> Result<SchedulingPhase, AppError> {
    let record = state.trip(trip_id)?;
    let mut record = record.lock().await;
    begin_pass(state, &mut record).await
}

pub(crate) async fn begin_pass(
    state: &Arc<AppState>,
    record: &mut TripRecord,
) -> Result<SchedulingPhase, AppError> {
    let trip_id = record.trip.id;

    if record.scheduling.in_flight() {
        debug!(trip_id = %trip_id, phase = ?record.scheduling.phase, "scheduling pass already in flight");
        return Ok(record.scheduling.phase);
    }
    if record.trip.status != TripStatus::Deadheading {
        return Err(TransitionError::InvalidTransition {
            from: record.trip.status,
            event: "request a matching pass",
        }
        .into());
    }

    record.scheduling.generation += 1;
    record.scheduling.recommendations = None;
    record.scheduling.enter(SchedulingPhase::AwaitingCandidates);

    match state.dispatch.trigger_matching_pass(trip_id).await {
        Ok(()) => {
            record.scheduling.enter(SchedulingPhase::Polling);

            let generation = record.scheduling.generation;
            let wait = state.settings.auto_match_wait;
            let task_state = state.clone();
            record.scheduling.pending = Some(tokio::spawn(async move {
                sleep(wait).await;
                complete_poll(&task_state, trip_id, generation).await;
            }));

            info!(trip_id = %trip_id, wait_ms = wait.as_millis() as u64, "matching pass requested");
        }
        Err(err) => {
            let err = DispatchError::SchedulingPassFailed(err.to_string());
            warn!(trip_id = %trip_id, error = %err, "falling back to manual selection");
            state
                .metrics
                .scheduling_passes_total
                .with_label_values(&["failed"])
                .inc();
            fall_back_to_manual(state, record).await;
        }
    }

    Ok(record.scheduling.phase)
}

async fn complete_poll(state: &Arc<AppState>, trip_id: Uuid, generation: u64) {
    let Ok(record) = state.trip(trip_id) else {
        return;
    };
    let mut record = record.lock().await;

    let current = record.scheduling.generation == generation
        && record.scheduling.phase == SchedulingPhase::Polling
        && record.trip.status == TripStatus::Deadheading;
    if !current {
        debug!(trip_id = %trip_id, "stale assignment check skipped");
        return;
    }
    // This task is the pending check; dropping its own handle detaches it.
    record.scheduling.pending = None;

    match state.dispatch.assigned_load(trip_id).await {
        Ok(Some(load)) => match bind_load(state, &mut record, load, AssignmentMode::Auto) {
            Ok(_) => return,
            Err(err) => warn!(trip_id = %trip_id, error = %err, "auto-assigned load could not be bound"),
        },
        Ok(None) => info!(trip_id = %trip_id, "no load auto-assigned"),
        Err(err) => warn!(trip_id = %trip_id, error = %err, "assignment check failed"),
    }

    fall_back_to_manual(state, &mut record).await;
}

async fn fall_back_to_manual(state: &AppState, record: &mut TripRecord) {
    let trip_id = record.trip.id;

    let ranking = match (state.dispatch.available_loads().await, trip_position(&record.trip)) {
        (Ok(loads), Some(position)) => {
            let start = Instant::now();
            let ranking = rank_loads(
                &loads,
                &position,
                &state.settings.weights(),
                &state.settings.costs,
            );
            state
                .metrics
                .ranking_latency_seconds
                .with_label_values(&["loads_for_trip"])
                .observe(start.elapsed().as_secs_f64());
            ranking.with_recommendation()
        }
        (Err(err), _) => {
            warn!(trip_id = %trip_id, error = %err, "available loads could not be fetched");
            Ranking::default()
        }
        (_, None) => Ranking::default(),
    };

    let candidates = ranking.len();
    let best_score = ranking.best().map(|entry| entry.profitability.score);
    record.scheduling.recommendations = Some(ranking);
    record.scheduling.enter(SchedulingPhase::ManualSelectionRequired);
    state
        .metrics
        .scheduling_passes_total
        .with_label_values(&["manual"])
        .inc();
    state.notify(Notification::ManualSelectionRequired {
        trip_id,
        candidates,
    });

    info!(trip_id = %trip_id, candidates, best_score, "manual selection required");
}

/// Binds an accepted load to the trip and records the assignment.
pub(crate) fn bind_load(
    state: &AppState,
    record: &mut TripRecord,
    load: Load,
    mode: AssignmentMode,
) -> Result<Assignment, AppError> {
    let trip_id = record.trip.id;

    let profitability = trip_position(&record.trip).and_then(|position| {
        score(&load, &position, &state.settings.weights(), &state.settings.costs)
            .inspect_err(|err| warn!(load_id = %load.id, error = %err, "assigned load could not be scored"))
            .ok()
    });

    record.trip.apply(TripEvent::AcceptLoad { load_id: load.id })?;
    record.scheduling.recommendations = None;
    record.scheduling.enter(SchedulingPhase::Assigned);

    let assignment = Assignment {
        id: Uuid::new_v4(),
        trip_id,
        load_id: load.id,
        mode,
        profitability,
        assigned_at: Utc::now(),
    };
    record.assignment = Some(assignment.clone());
    state.assignments.insert(assignment.id, assignment.clone());

    state.update_vehicle(record.trip.vehicle_id, VehicleStatus::Allocated, None);

    let outcome = match mode {
        AssignmentMode::Auto => "auto",
        AssignmentMode::Manual => "manual_accept",
    };
    state
        .metrics
        .scheduling_passes_total
        .with_label_values(&[outcome])
        .inc();
    state.notify(Notification::LoadAssigned(assignment.clone()));

    info!(
        trip_id = %trip_id,
        load_id = %load.id,
        mode = outcome,
        score = profitability.map(|p| p.score),
        "load bound to trip"
    );

    Ok(assignment)
}
