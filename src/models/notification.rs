use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::assignment::Assignment;
use crate::models::verification::Phase;

/// Events pushed to dashboards over the websocket feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LoadAssigned(Assignment),
    ManualSelectionRequired {
        trip_id: Uuid,
        candidates: usize,
    },
    PickupVerified {
        trip_id: Uuid,
        load_id: Uuid,
        at: DateTime<Utc>,
    },
    DeliveryVerified {
        trip_id: Uuid,
        load_id: Uuid,
        at: DateTime<Utc>,
    },
    VerificationFailed {
        trip_id: Uuid,
        phase: Phase,
        reason: String,
    },
    TripAbandoned {
        trip_id: Uuid,
    },
}
