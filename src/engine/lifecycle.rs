use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TransitionError;
use crate::models::trip::{Trip, TripStatus};
use crate::models::verification::{Phase, PhaseVerified};

/// Inputs that can move a trip along its lifecycle.
#[derive(Debug, Clone)]
pub enum TripEvent {
    MarkDeadheading,
    AcceptLoad { load_id: Uuid },
    ConfirmPickup(PhaseVerified),
    ConfirmDelivery(PhaseVerified),
    Abandon,
}

impl TripEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TripEvent::MarkDeadheading => "mark deadheading",
            TripEvent::AcceptLoad { .. } => "accept a load",
            TripEvent::ConfirmPickup(_) => "confirm pickup",
            TripEvent::ConfirmDelivery(_) => "confirm delivery",
            TripEvent::Abandon => "abandon",
        }
    }
}

impl Trip {
    /// Checks `event` against the current state without changing anything.
    pub fn check(&self, event: &TripEvent) -> Result<TripStatus, TransitionError> {
        let invalid = || TransitionError::InvalidTransition {
            from: self.status,
            event: event.name(),
        };

        match (self.status, event) {
            (TripStatus::Planning, TripEvent::MarkDeadheading) => {
                if self.origin.coordinate().is_none() || self.destination.coordinate().is_none() {
                    return Err(TransitionError::RouteUnconfirmed);
                }
                Ok(TripStatus::Deadheading)
            }
            (TripStatus::Deadheading, TripEvent::AcceptLoad { .. }) if self.bound_load.is_none() => {
                Ok(TripStatus::Assigned)
            }
            (TripStatus::Assigned, TripEvent::ConfirmPickup(proof)) => {
                self.check_proof(proof, Phase::Pickup)?;
                Ok(TripStatus::PickedUp)
            }
            (TripStatus::PickedUp, TripEvent::ConfirmDelivery(proof)) => {
                self.check_proof(proof, Phase::Delivery)?;
                Ok(TripStatus::Delivered)
            }
            (TripStatus::Planning | TripStatus::Deadheading, TripEvent::Abandon) => {
                Ok(TripStatus::Abandoned)
            }
            _ => Err(invalid()),
        }
    }

    /// Applies `event`, leaving the trip untouched when it is rejected.
    pub fn apply(&mut self, event: TripEvent) -> Result<TripStatus, TransitionError> {
        self.apply_at(event, Utc::now())
    }

    pub fn apply_at(
        &mut self,
        event: TripEvent,
        now: DateTime<Utc>,
    ) -> Result<TripStatus, TransitionError> {
        let next = self.check(&event)?;
        debug_assert!(next > self.status);

        if let TripEvent::AcceptLoad { load_id } = event {
            self.bound_load = Some(load_id);
        }
        if next == TripStatus::Delivered {
            self.archived_at = Some(now);
        }

        self.status = next;
        self.updated_at = now;
        Ok(next)
    }

    fn check_proof(&self, proof: &PhaseVerified, phase: Phase) -> Result<(), TransitionError> {
        let belongs = proof.trip_id() == self.id
            && proof.phase() == phase
            && self.bound_load == Some(proof.load_id());

        if belongs {
            Ok(())
        } else {
            Err(TransitionError::ProofMismatch {
                phase: proof.phase(),
                load_id: proof.load_id(),
            })
        }
    }
}
