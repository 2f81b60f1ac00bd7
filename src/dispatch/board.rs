use chrono::Utc;
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::DispatchBackend;
use crate::engine::ranking::rank_loads;
use crate::engine::scoring::{CostModel, ScoreWeights, VehiclePosition};
use crate::error::DispatchError;
use crate::models::load::{Load, LoadStatus};

/// In-process load board. Loads and registered trips live in memory; the
/// matching pass ranks available loads for the trip's position and assigns
/// the best profitable one from the shortlist.
pub struct LoadBoard {
    loads: DashMap<Uuid, Load>,
    trips: DashMap<Uuid, VehiclePosition>,
    weights: ScoreWeights,
    costs: CostModel,
    shortlist: usize,
}

impl LoadBoard {
    pub fn new(weights: ScoreWeights, costs: CostModel, shortlist: usize) -> Self {
        Self {
            loads: DashMap::new(),
            trips: DashMap::new(),
            weights,
            costs,
            shortlist: shortlist.max(1),
        }
    }

    fn find_assigned(&self, trip_id: Uuid) -> Option<Load> {
        self.loads
            .iter()
            .find(|entry| {
                let load = entry.value();
                load.assigned_trip == Some(trip_id) && load.status == LoadStatus::Assigned
            })
            .map(|entry| entry.value().clone())
    }

    fn available(&self) -> Vec<Load> {
        let mut loads: Vec<Load> = self
            .loads
            .iter()
            .filter(|entry| entry.value().status == LoadStatus::Available)
            .map(|entry| entry.value().clone())
            .collect();
        // Oldest posting first so ranking ties resolve by posting order.
        loads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        loads
    }

    fn release_held(&self, trip_id: Uuid, keep: Option<Uuid>) {
        for mut entry in self.loads.iter_mut() {
            let load = entry.value_mut();
            let held = load.assigned_trip == Some(trip_id)
                && load.status == LoadStatus::Assigned
                && Some(load.id) != keep;
            if held {
                load.status = LoadStatus::Available;
                load.assigned_trip = None;
                load.updated_at = Utc::now();
                info!(load_id = %load.id, trip_id = %trip_id, "load returned to board");
            }
        }
    }

    fn claim(&self, load_id: Uuid, trip_id: Uuid) -> Result<Load, DispatchError> {
        let mut load = self
            .loads
            .get_mut(&load_id)
            .ok_or(DispatchError::LoadNotFound(load_id))?;

        let claimable = load.status == LoadStatus::Available
            || (load.status == LoadStatus::Assigned && load.assigned_trip == Some(trip_id));
        if !claimable {
            return Err(DispatchError::LoadUnavailable {
                load_id,
                status: load.status,
            });
        }

        load.status = LoadStatus::Assigned;
        load.assigned_trip = Some(trip_id);
        load.updated_at = Utc::now();
        Ok(load.clone())
    }

    fn run_matching_pass(&self, trip_id: Uuid) -> Result<(), DispatchError> {
        let position = *self
            .trips
            .get(&trip_id)
            .ok_or(DispatchError::TripNotRegistered(trip_id))?;

        if let Some(existing) = self.find_assigned(trip_id) {
            debug!(trip_id = %trip_id, load_id = %existing.id, "trip already holds a load");
            return Ok(());
        }

        let ranking = rank_loads(&self.available(), &position, &self.weights, &self.costs);
        let shortlist = ranking
            .entries
            .iter()
            .take(self.shortlist)
            .filter(|entry| entry.profitability.net_profit > 0.0);

        for entry in shortlist {
            // Another pass may have taken the load since ranking.
            if let Ok(load) = self.claim(entry.candidate.id, trip_id) {
                info!(
                    trip_id = %trip_id,
                    load_id = %load.id,
                    score = entry.profitability.score,
                    net_profit = entry.profitability.net_profit,
                    "load auto-assigned"
                );
                return Ok(());
            }
        }

        info!(trip_id = %trip_id, candidates = ranking.len(), "matching pass found no profitable load");
        Ok(())
    }

    fn change_status(&self, load_id: Uuid, status: LoadStatus) -> Result<Load, DispatchError> {
        let mut load = self
            .loads
            .get_mut(&load_id)
            .ok_or(DispatchError::LoadNotFound(load_id))?;

        if !load.status.can_move_to(status) {
            return Err(DispatchError::InvalidLoadStatus {
                load_id,
                from: load.status,
                to: status,
            });
        }

        load.status = status;
        load.updated_at = Utc::now();
        Ok(load.clone())
    }
}

impl DispatchBackend for LoadBoard {
    fn trigger_matching_pass(&self, trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>> {
        future::ready(self.run_matching_pass(trip_id)).boxed()
    }

    fn assigned_load(&self, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>> {
        future::ready(Ok(self.find_assigned(trip_id))).boxed()
    }

    fn available_loads(&self) -> BoxFuture<'_, Result<Vec<Load>, DispatchError>> {
        future::ready(Ok(self.available())).boxed()
    }

    fn accept_load(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> BoxFuture<'_, Result<Load, DispatchError>> {
        let result = self.claim(load_id, trip_id).inspect(|_| {
            self.release_held(trip_id, Some(load_id));
        });
        future::ready(result).boxed()
    }

    fn publish_load(&self, load: Load) -> BoxFuture<'_, Result<Load, DispatchError>> {
        self.loads.insert(load.id, load.clone());
        future::ready(Ok(load)).boxed()
    }

    fn load(&self, load_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>> {
        let load = self.loads.get(&load_id).map(|entry| entry.value().clone());
        future::ready(Ok(load)).boxed()
    }

    fn set_load_status(
        &self,
        load_id: Uuid,
        status: LoadStatus,
    ) -> BoxFuture<'_, Result<Load, DispatchError>> {
        future::ready(self.change_status(load_id, status)).boxed()
    }

    fn register_trip(
        &self,
        trip_id: Uuid,
        position: VehiclePosition,
    ) -> BoxFuture<'_, Result<(), DispatchError>> {
        self.trips.insert(trip_id, position);
        future::ready(Ok(())).boxed()
    }

    fn release_trip(&self, trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>> {
        self.trips.remove(&trip_id);
        self.release_held(trip_id, None);
        future::ready(Ok(())).boxed()
    }
}
