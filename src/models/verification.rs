use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pickup,
    Delivery,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pickup => "pickup",
            Phase::Delivery => "delivery",
        }
    }

    /// The party expected to scan a token of this phase.
    pub fn scanner_role(self) -> ScannerRole {
        match self {
            Phase::Pickup => ScannerRole::Driver,
            Phase::Delivery => ScannerRole::Receiver,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScannerRole {
    Driver,
    Receiver,
    Vendor,
}

impl fmt::Display for ScannerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScannerRole::Driver => "driver",
            ScannerRole::Receiver => "receiver",
            ScannerRole::Vendor => "vendor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub id: Uuid,
    pub phase: Phase,
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub bound_location: Coordinate,
    pub expected_scanner: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub scanner_id: Uuid,
    pub role: ScannerRole,
    pub location: Coordinate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub token_id: Uuid,
    pub phase: Phase,
    pub scanner_id: Uuid,
    pub role: ScannerRole,
    pub success: bool,
    pub reason: Option<String>,
    pub distance_m: Option<f64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationStatus {
    pub trip_id: Uuid,
    pub pickup_verified: bool,
    pub delivery_verified: bool,
    pub tokens: Vec<VerificationToken>,
    pub attempts: Vec<VerificationAttempt>,
}

/// Proof that a phase was verified in person. Only the verification
/// protocol can mint one, and the trip lifecycle demands it for the
/// pickup and delivery transitions.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseVerified {
    token_id: Uuid,
    trip_id: Uuid,
    load_id: Uuid,
    phase: Phase,
    verified_at: DateTime<Utc>,
}

impl PhaseVerified {
    pub(crate) fn new(token: &VerificationToken, verified_at: DateTime<Utc>) -> Self {
        Self {
            token_id: token.id,
            trip_id: token.trip_id,
            load_id: token.load_id,
            phase: token.phase,
            verified_at,
        }
    }

    pub fn token_id(&self) -> Uuid {
        self.token_id
    }

    pub fn trip_id(&self) -> Uuid {
        self.trip_id
    }

    pub fn load_id(&self) -> Uuid {
        self.load_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }
}
