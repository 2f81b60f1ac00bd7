pub mod board;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::engine::scoring::VehiclePosition;
use crate::error::DispatchError;
use crate::models::load::{Load, LoadStatus};

/// The load-board service that owns loads and runs automatic matching.
///
/// Every call may fail and none is retried here; callers decide whether a
/// failure is worth another attempt.
pub trait DispatchBackend: Send + Sync {
    /// Runs one automatic matching pass for a deadheading trip.
    fn trigger_matching_pass(&self, trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>>;

    /// The load the last matching pass assigned to `trip_id`, if any.
    fn assigned_load(&self, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>>;

    fn available_loads(&self) -> BoxFuture<'_, Result<Vec<Load>, DispatchError>>;

    fn accept_load(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> BoxFuture<'_, Result<Load, DispatchError>>;

    fn publish_load(&self, load: Load) -> BoxFuture<'_, Result<Load, DispatchError>>;

    fn load(&self, load_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>>;

    fn set_load_status(
        &self,
        load_id: Uuid,
        status: LoadStatus,
    ) -> BoxFuture<'_, Result<Load, DispatchError>>;

    /// Makes a deadheading trip visible to the matching pass.
    fn register_trip(
        &self,
        trip_id: Uuid,
        position: VehiclePosition,
    ) -> BoxFuture<'_, Result<(), DispatchError>>;

    /// Withdraws a trip, handing back any load it holds but never picked up.
    fn release_trip(&self, trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>>;
}
