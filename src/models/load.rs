use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Location;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Available,
    Assigned,
    PickedUp,
    Delivered,
    Rejected,
}

impl LoadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadStatus::Delivered | LoadStatus::Rejected)
    }

    pub fn can_move_to(self, next: LoadStatus) -> bool {
        use LoadStatus::*;

        matches!(
            (self, next),
            (Available, Assigned)
                | (Available, Rejected)
                | (Assigned, PickedUp)
                | (PickedUp, Delivered)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub pickup: Location,
    pub destination: Location,
    pub weight_kg: f64,
    pub price_offered: f64,
    pub status: LoadStatus,
    pub assigned_trip: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
