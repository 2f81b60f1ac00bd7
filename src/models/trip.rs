use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Location;

/// Trip lifecycle. Variants are declared in lifecycle order, so the derived
/// ordering doubles as the "never move backward" check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planning,
    Deadheading,
    Assigned,
    PickedUp,
    Delivered,
    Abandoned,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripStatus::Planning => "planning",
            TripStatus::Deadheading => "deadheading",
            TripStatus::Assigned => "assigned",
            TripStatus::PickedUp => "picked_up",
            TripStatus::Delivered => "delivered",
            TripStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub origin: Location,
    pub destination: Location,
    pub status: TripStatus,
    pub bound_load: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn new(
        driver_id: Uuid,
        vehicle_id: Option<Uuid>,
        origin: Location,
        destination: Location,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            driver_id,
            vehicle_id,
            origin,
            destination,
            status: TripStatus::Planning,
            bound_load: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }
}
