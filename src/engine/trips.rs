use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::TripEvent;
use crate::engine::ranking::{rank_loads, LoadRanking};
use crate::engine::scheduler::{begin_pass, bind_load, trip_position};
use crate::engine::scoring::ScoringStrategy;
use crate::engine::verification::TokenRequest;
use crate::error::{AppError, DispatchError, ScoringError, VerificationError};
use crate::geo::{Coordinate, Location};
use crate::models::assignment::{Assignment, AssignmentMode};
use crate::models::load::LoadStatus;
use crate::models::notification::Notification;
use crate::models::trip::{Trip, TripStatus};
use crate::models::vehicle::VehicleStatus;
use crate::models::verification::{Phase, Scan, VerificationToken};
use crate::state::{AppState, TripRecord, TripView};

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub origin: Location,
    pub destination: Location,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenOrder {
    pub phase: Phase,
    /// Overrides the load's pickup or destination coordinate.
    pub bound_location: Option<Coordinate>,
    /// The party expected to scan a delivery token.
    pub receiver_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub token_id: Uuid,
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub phase: Phase,
    pub verified_at: DateTime<Utc>,
    pub trip_status: TripStatus,
}

fn required_status(phase: Phase) -> TripStatus {
    match phase {
        Phase::Pickup => TripStatus::Assigned,
        Phase::Delivery => TripStatus::PickedUp,
    }
}

pub fn create_trip(state: &AppState, request: NewTrip) -> Result<TripView, AppError> {
    if let Some(vehicle_id) = request.vehicle_id {
        if !state.vehicles.contains_key(&vehicle_id) {
            return Err(AppError::NotFound(format!("vehicle {vehicle_id} not found")));
        }
    }

    let trip = Trip::new(
        request.driver_id,
        request.vehicle_id,
        request.origin,
        request.destination,
    );
    if let Some(vehicle_id) = trip.vehicle_id {
        state.hold_vehicle(vehicle_id, trip.id)?;
    }
    let record = TripRecord::new(trip);
    let view = record.view();

    state
        .trips
        .insert(view.trip.id, Arc::new(tokio::sync::Mutex::new(record)));
    state.metrics.active_trips.inc();

    info!(trip_id = %view.trip.id, driver_id = %view.trip.driver_id, "trip created");
    Ok(view)
}

pub async fn trip_view(state: &AppState, trip_id: Uuid) -> Result<TripView, AppError> {
    let record = state.trip(trip_id)?;
    let record = record.lock().await;
    Ok(record.view())
}

/// Starts the return leg and kicks off the first scheduling pass.
pub async fn mark_deadheading(state: &Arc<AppState>, trip_id: Uuid) -> Result<TripView, AppError> {
    let record = state.trip(trip_id)?;
    let mut record = record.lock().await;

    record.trip.check(&TripEvent::MarkDeadheading)?;
    let position = trip_position(&record.trip).ok_or(ScoringError::MissingLocation {
        subject: "trip",
        field: "origin",
    })?;

    state.dispatch.register_trip(trip_id, position).await?;
    record.trip.apply(TripEvent::MarkDeadheading)?;
    state.update_vehicle(
        record.trip.vehicle_id,
        VehicleStatus::Deadheading,
        Some(position.current),
    );
    info!(trip_id = %trip_id, "trip deadheading");

    begin_pass(state, &mut record).await?;
    Ok(record.view())
}

/// The driver's explicit pick, typically from the recommendation list.
pub async fn accept_load(
    state: &AppState,
    trip_id: Uuid,
    load_id: Uuid,
) -> Result<Assignment, AppError> {
    let record = state.trip(trip_id)?;
    let mut record = record.lock().await;

    if record.scheduling.in_flight() {
        return Err(AppError::Conflict(format!(
            "trip {trip_id} has a scheduling pass in flight"
        )));
    }
    record.trip.check(&TripEvent::AcceptLoad { load_id })?;

    let load = state.dispatch.accept_load(load_id, trip_id).await?;
    bind_load(state, &mut record, load, AssignmentMode::Manual)
}

pub async fn abandon(state: &AppState, trip_id: Uuid) -> Result<TripView, AppError> {
    let record = state.trip(trip_id)?;
    let mut record = record.lock().await;

    record.trip.check(&TripEvent::Abandon)?;

    if record.trip.status == TripStatus::Deadheading {
        if let Err(err) = state.dispatch.release_trip(trip_id).await {
            warn!(trip_id = %trip_id, error = %err, "trip could not be withdrawn from the load board");
        }
    }
    if record.scheduling.cancel() {
        info!(trip_id = %trip_id, "pending assignment check cancelled");
    }

    record.trip.apply(TripEvent::Abandon)?;
    state.update_vehicle(record.trip.vehicle_id, VehicleStatus::Available, None);
    state.release_vehicle(record.trip.vehicle_id, trip_id);
    state.metrics.active_trips.dec();
    state.notify(Notification::TripAbandoned { trip_id });

    info!(trip_id = %trip_id, "trip abandoned");
    Ok(record.view())
}

pub async fn assignment(state: &AppState, trip_id: Uuid) -> Result<Assignment, AppError> {
    let record = state.trip(trip_id)?;
    let record = record.lock().await;
    record
        .assignment
        .clone()
        .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} has no assignment")))
}

/// Ranks the board's available loads from the trip's position.
pub async fn rank_loads_for_trip(
    state: &AppState,
    trip_id: Uuid,
    strategy: Option<ScoringStrategy>,
) -> Result<LoadRanking, AppError> {
    let position = {
        let record = state.trip(trip_id)?;
        let record = record.lock().await;
        trip_position(&record.trip).ok_or(ScoringError::MissingLocation {
            subject: "trip",
            field: "origin",
        })?
    };

    let loads = state.dispatch.available_loads().await?;
    let weights = strategy
        .map(ScoringStrategy::weights)
        .unwrap_or_else(|| state.settings.weights());

    let start = Instant::now();
    let ranking = rank_loads(&loads, &position, &weights, &state.settings.costs);
    state
        .metrics
        .ranking_latency_seconds
        .with_label_values(&["loads_for_trip"])
        .observe(start.elapsed().as_secs_f64());

    Ok(ranking.with_recommendation())
}

pub async fn issue_token(
    state: &AppState,
    trip_id: Uuid,
    order: TokenOrder,
) -> Result<VerificationToken, AppError> {
    let record = state.trip(trip_id)?;
    let record = record.lock().await;
    let trip = &record.trip;

    if order.phase == Phase::Delivery && !state.verification.is_verified(trip_id, Phase::Pickup) {
        return Err(VerificationError::PhaseOrder(trip_id).into());
    }
    let required = required_status(order.phase);
    if trip.status != required {
        return Err(VerificationError::TripNotReady {
            phase: order.phase,
            status: trip.status,
            required,
        }
        .into());
    }
    let load_id = trip
        .bound_load
        .ok_or_else(|| AppError::Conflict(format!("trip {trip_id} has no bound load")))?;

    // The board is the authority on the load; a load that left the trip's
    // custody must not be verified.
    let load = state
        .dispatch
        .load(load_id)
        .await?
        .ok_or(DispatchError::LoadNotFound(load_id))?;
    let expected_load_status = match order.phase {
        Phase::Pickup => LoadStatus::Assigned,
        Phase::Delivery => LoadStatus::PickedUp,
    };
    if load.status != expected_load_status || load.assigned_trip != Some(trip_id) {
        return Err(DispatchError::LoadUnavailable {
            load_id,
            status: load.status,
        }
        .into());
    }

    let bound_location = match order.bound_location {
        Some(coordinate) if coordinate.is_valid() => coordinate,
        Some(_) => {
            return Err(AppError::BadRequest(
                "bound_location is not a valid coordinate".to_string(),
            ))
        }
        None => {
            let location = match order.phase {
                Phase::Pickup => load.pickup.coordinate(),
                Phase::Delivery => load.destination.coordinate(),
            };
            location.ok_or(ScoringError::MissingLocation {
                subject: "load",
                field: match order.phase {
                    Phase::Pickup => "pickup",
                    Phase::Delivery => "destination",
                },
            })?
        }
    };

    let expected_scanner = match order.phase {
        Phase::Pickup => Some(trip.driver_id),
        Phase::Delivery => order.receiver_id,
    };

    let token = state.verification.issue_token(TokenRequest {
        trip_id,
        load_id,
        phase: order.phase,
        bound_location,
        expected_scanner,
    })?;
    Ok(token)
}

/// Verifies a scan and, on success, moves the trip and its load forward.
pub async fn verify_scan(
    state: &AppState,
    token_id: Uuid,
    scan: Scan,
) -> Result<VerificationOutcome, AppError> {
    let token = state
        .verification
        .token(token_id)
        .ok_or(VerificationError::TokenNotFound(token_id))?;

    let record = state.trip(token.trip_id)?;
    let mut record = record.lock().await;
    let trip_id = record.trip.id;

    // A scan the trip cannot act on must not burn the token.
    let required = required_status(token.phase);
    if record.trip.status != required && !token.used {
        return Err(VerificationError::TripNotReady {
            phase: token.phase,
            status: record.trip.status,
            required,
        }
        .into());
    }

    let proof = match state.verification.verify(token_id, &scan) {
        Ok(proof) => {
            state
                .metrics
                .verification_attempts_total
                .with_label_values(&[token.phase.as_str(), "success"])
                .inc();
            proof
        }
        Err(err) => {
            state
                .metrics
                .verification_attempts_total
                .with_label_values(&[token.phase.as_str(), "failure"])
                .inc();
            state.notify(Notification::VerificationFailed {
                trip_id,
                phase: token.phase,
                reason: err.to_string(),
            });
            return Err(err.into());
        }
    };

    let (event, load_status) = match proof.phase() {
        Phase::Pickup => (TripEvent::ConfirmPickup(proof.clone()), LoadStatus::PickedUp),
        Phase::Delivery => (TripEvent::ConfirmDelivery(proof.clone()), LoadStatus::Delivered),
    };
    let trip_status = record.trip.apply_at(event, proof.verified_at())?;

    // The trip has already moved; a board that falls behind is reconciled
    // out of band rather than undoing a verified scan.
    if let Err(err) = state
        .dispatch
        .set_load_status(proof.load_id(), load_status)
        .await
    {
        error!(load_id = %proof.load_id(), error = %err, "load status not synced after verification");
    }

    let notification = match proof.phase() {
        Phase::Pickup => Notification::PickupVerified {
            trip_id,
            load_id: proof.load_id(),
            at: proof.verified_at(),
        },
        Phase::Delivery => {
            if let Err(err) = state.dispatch.release_trip(trip_id).await {
                error!(trip_id = %trip_id, error = %err, "delivered trip not released");
            }
            state.update_vehicle(
                record.trip.vehicle_id,
                VehicleStatus::Available,
                Some(token.bound_location),
            );
            state.release_vehicle(record.trip.vehicle_id, trip_id);
            state.metrics.active_trips.dec();
            info!(trip_id = %trip_id, "trip delivered and archived");

            Notification::DeliveryVerified {
                trip_id,
                load_id: proof.load_id(),
                at: proof.verified_at(),
            }
        }
    };
    state.notify(notification);

    Ok(VerificationOutcome {
        token_id: proof.token_id(),
        trip_id,
        load_id: proof.load_id(),
        phase: proof.phase(),
        verified_at: proof.verified_at(),
        trip_status,
    })
}
