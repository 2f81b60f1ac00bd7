use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::board::LoadBoard;
use crate::dispatch::DispatchBackend;
use crate::engine::auto_scheduler::AutoScheduler;
use crate::engine::scheduler::{SchedulingRecord, SchedulingView};
use crate::engine::scoring::{CostModel, ScoreWeights, ScoringStrategy};
use crate::engine::verification::{ProximityPolicy, VerificationProtocol};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::assignment::Assignment;
use crate::models::notification::Notification;
use crate::models::trip::Trip;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::observability::metrics::Metrics;

/// Everything the service knows about one trip. Each record sits behind its
/// own async mutex, which is how operations on the same trip are serialized.
#[derive(Debug)]
pub struct TripRecord {
    pub trip: Trip,
    pub scheduling: SchedulingRecord,
    pub assignment: Option<Assignment>,
}

impl TripRecord {
    pub fn new(trip: Trip) -> Self {
        Self {
            trip,
            scheduling: SchedulingRecord::default(),
            assignment: None,
        }
    }

    pub fn view(&self) -> TripView {
        TripView {
            trip: self.trip.clone(),
            scheduling: self.scheduling.view(),
            assignment: self.assignment.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TripView {
    #[serde(flatten)]
    pub trip: Trip,
    pub scheduling: SchedulingView,
    pub assignment: Option<Assignment>,
}

pub type SharedTrip = Arc<Mutex<TripRecord>>;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub strategy: ScoringStrategy,
    pub costs: CostModel,
    pub auto_match_wait: Duration,
}

impl EngineSettings {
    pub fn weights(&self) -> ScoreWeights {
        self.strategy.weights()
    }
}

pub struct AppState {
    pub settings: EngineSettings,
    pub trips: DashMap<Uuid, SharedTrip>,
    pub vehicles: DashMap<Uuid, Vehicle>,
    /// Vehicle id to the live trip currently holding it.
    pub vehicle_holds: DashMap<Uuid, Uuid>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub dispatch: Arc<dyn DispatchBackend>,
    pub verification: VerificationProtocol,
    pub notifications_tx: broadcast::Sender<Notification>,
    pub metrics: Metrics,
    pub auto_scheduler: AutoScheduler,
}

impl AppState {
    pub fn new(config: &Config, dispatch: Arc<dyn DispatchBackend>) -> Self {
        let (notifications_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        let verification = VerificationProtocol::new(
            ProximityPolicy {
                max_distance_m: config.verification_radius_m,
            },
            config.token_validity(),
        );

        Self {
            settings: EngineSettings {
                strategy: config.scoring_strategy,
                costs: config.cost_model(),
                auto_match_wait: config.auto_match_wait(),
            },
            trips: DashMap::new(),
            vehicles: DashMap::new(),
            vehicle_holds: DashMap::new(),
            assignments: DashMap::new(),
            dispatch,
            verification,
            notifications_tx,
            metrics: Metrics::new(),
            auto_scheduler: AutoScheduler::new(config.auto_scheduler_interval()),
        }
    }

    /// State backed by the in-process load board.
    pub fn with_load_board(config: &Config) -> Self {
        let board = LoadBoard::new(
            config.scoring_strategy.weights(),
            config.cost_model(),
            config.matching_shortlist,
        );
        Self::new(config, Arc::new(board))
    }

    pub fn trip(&self, trip_id: Uuid) -> Result<SharedTrip, AppError> {
        self.trips
            .get(&trip_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))
    }

    /// Reserves the vehicle for `trip_id` until that trip is delivered or
    /// abandoned.
    pub fn hold_vehicle(&self, vehicle_id: Uuid, trip_id: Uuid) -> Result<(), AppError> {
        match self.vehicle_holds.entry(vehicle_id) {
            Entry::Occupied(entry) => Err(AppError::Conflict(format!(
                "vehicle {vehicle_id} is held by trip {}",
                entry.get()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(trip_id);
                Ok(())
            }
        }
    }

    pub fn release_vehicle(&self, vehicle_id: Option<Uuid>, trip_id: Uuid) {
        if let Some(vehicle_id) = vehicle_id {
            self.vehicle_holds
                .remove_if(&vehicle_id, |_, holder| *holder == trip_id);
        }
    }

    pub fn vehicle_holder(&self, vehicle_id: Uuid) -> Option<Uuid> {
        self.vehicle_holds.get(&vehicle_id).map(|entry| *entry.value())
    }

    /// Moves the trip's vehicle, if it has one, to `status`.
    pub fn update_vehicle(
        &self,
        vehicle_id: Option<Uuid>,
        status: VehicleStatus,
        location: Option<Coordinate>,
    ) {
        let Some(mut vehicle) = vehicle_id.and_then(|id| self.vehicles.get_mut(&id)) else {
            return;
        };
        vehicle.status = status;
        if let Some(location) = location {
            vehicle.location = location;
        }
        vehicle.updated_at = Utc::now();
    }

    pub fn notify(&self, notification: Notification) {
        // No subscribers is fine; the feed is best effort.
        let _ = self.notifications_tx.send(notification);
    }
}
