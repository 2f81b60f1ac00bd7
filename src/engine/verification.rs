use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::VerificationError;
use crate::geo::{distance_km, Coordinate};
use crate::models::verification::{
    Phase, PhaseVerified, Scan, VerificationAttempt, VerificationStatus, VerificationToken,
};

/// Decides whether the person holding the scanner is who the token expects.
/// Deployments plug their identity or anomaly checks in here.
pub trait IdentityOracle: Send + Sync {
    fn confirm(&self, token: &VerificationToken, scan: &Scan) -> Result<(), String>;
}

/// Accepts the party recorded on the token, or anyone when none was recorded.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignedPartyOracle;

impl IdentityOracle for AssignedPartyOracle {
    fn confirm(&self, token: &VerificationToken, scan: &Scan) -> Result<(), String> {
        match token.expected_scanner {
            Some(expected) if expected != scan.scanner_id => Err(format!(
                "{} {} does not match the assigned party",
                scan.role, scan.scanner_id
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityPolicy {
    pub max_distance_m: f64,
}

impl Default for ProximityPolicy {
    fn default() -> Self {
        Self {
            max_distance_m: 100.0,
        }
    }
}

impl ProximityPolicy {
    /// Returns the scan distance in metres when it is close enough.
    pub fn check(&self, bound: &Coordinate, scanned: &Coordinate) -> Result<f64, VerificationError> {
        let distance_m = distance_km(bound, scanned) * 1_000.0;
        // Written so a NaN limit or distance fails closed.
        if !(distance_m <= self.max_distance_m) {
            return Err(VerificationError::LocationMismatch {
                distance_m,
                limit_m: self.max_distance_m,
            });
        }
        Ok(distance_m)
    }
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub phase: Phase,
    pub bound_location: Coordinate,
    pub expected_scanner: Option<Uuid>,
}

pub struct VerificationProtocol {
    tokens: DashMap<Uuid, VerificationToken>,
    verified: DashMap<(Uuid, Phase), DateTime<Utc>>,
    attempts: DashMap<Uuid, Vec<VerificationAttempt>>,
    proximity: ProximityPolicy,
    validity: Duration,
    oracle: Arc<dyn IdentityOracle>,
}

impl VerificationProtocol {
    pub fn new(proximity: ProximityPolicy, validity: Duration) -> Self {
        Self::with_oracle(proximity, validity, Arc::new(AssignedPartyOracle))
    }

    pub fn with_oracle(
        proximity: ProximityPolicy,
        validity: Duration,
        oracle: Arc<dyn IdentityOracle>,
    ) -> Self {
        Self {
            tokens: DashMap::new(),
            verified: DashMap::new(),
            attempts: DashMap::new(),
            proximity,
            validity,
            oracle,
        }
    }

    pub fn issue_token(&self, request: TokenRequest) -> Result<VerificationToken, VerificationError> {
        self.issue_token_at(request, Utc::now())
    }

    pub fn issue_token_at(
        &self,
        request: TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<VerificationToken, VerificationError> {
        if request.phase == Phase::Delivery && !self.is_verified(request.trip_id, Phase::Pickup) {
            return Err(VerificationError::PhaseOrder(request.trip_id));
        }

        let token = VerificationToken {
            id: Uuid::new_v4(),
            phase: request.phase,
            trip_id: request.trip_id,
            load_id: request.load_id,
            bound_location: request.bound_location,
            expected_scanner: request.expected_scanner,
            issued_at: now,
            expires_at: now
                .checked_add_signed(self.validity)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            used: false,
            used_at: None,
        };

        self.tokens.insert(token.id, token.clone());
        info!(
            token_id = %token.id,
            trip_id = %token.trip_id,
            phase = %token.phase,
            "verification token issued"
        );

        Ok(token)
    }

    pub fn token(&self, token_id: Uuid) -> Option<VerificationToken> {
        self.tokens.get(&token_id).map(|entry| entry.value().clone())
    }

    pub fn verify(&self, token_id: Uuid, scan: &Scan) -> Result<PhaseVerified, VerificationError> {
        self.verify_at(token_id, scan, Utc::now())
    }

    pub fn verify_at(
        &self,
        token_id: Uuid,
        scan: &Scan,
        now: DateTime<Utc>,
    ) -> Result<PhaseVerified, VerificationError> {
        // The entry guard is held across check-and-mark so a token can only
        // ever be consumed once.
        let (outcome, trip_id, phase) = {
            let mut token = self
                .tokens
                .get_mut(&token_id)
                .ok_or(VerificationError::TokenNotFound(token_id))?;

            let outcome = self.evaluate(&token, scan, now);
            if outcome.is_ok() {
                token.used = true;
                token.used_at = Some(now);
                self.verified.insert((token.trip_id, token.phase), now);
            }
            let proof = outcome.map(|distance_m| (PhaseVerified::new(&token, now), distance_m));
            (proof, token.trip_id, token.phase)
        };

        let attempt = VerificationAttempt {
            token_id,
            phase,
            scanner_id: scan.scanner_id,
            role: scan.role,
            success: outcome.is_ok(),
            reason: outcome.as_ref().err().map(ToString::to_string),
            distance_m: outcome.as_ref().ok().map(|(_, distance_m)| *distance_m),
            at: now,
        };
        self.attempts.entry(trip_id).or_default().push(attempt);

        match outcome {
            Ok((proof, distance_m)) => {
                info!(
                    token_id = %token_id,
                    trip_id = %trip_id,
                    phase = %phase,
                    distance_m,
                    "phase verified"
                );
                Ok(proof)
            }
            Err(err) => {
                warn!(
                    token_id = %token_id,
                    trip_id = %trip_id,
                    phase = %phase,
                    error = %err,
                    "verification rejected"
                );
                Err(err)
            }
        }
    }

    pub fn is_verified(&self, trip_id: Uuid, phase: Phase) -> bool {
        self.verified.contains_key(&(trip_id, phase))
    }

    pub fn status(&self, trip_id: Uuid) -> VerificationStatus {
        let mut tokens: Vec<VerificationToken> = self
            .tokens
            .iter()
            .filter(|entry| entry.value().trip_id == trip_id)
            .map(|entry| entry.value().clone())
            .collect();
        tokens.sort_by_key(|token| token.issued_at);

        let attempts = self
            .attempts
            .get(&trip_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        VerificationStatus {
            trip_id,
            pickup_verified: self.is_verified(trip_id, Phase::Pickup),
            delivery_verified: self.is_verified(trip_id, Phase::Delivery),
            tokens,
            attempts,
        }
    }

    fn evaluate(
        &self,
        token: &VerificationToken,
        scan: &Scan,
        now: DateTime<Utc>,
    ) -> Result<f64, VerificationError> {
        if token.used {
            return Err(VerificationError::TokenReused(token.id));
        }
        if now > token.expires_at {
            return Err(VerificationError::TokenExpired(token.id));
        }
        if scan.role != token.phase.scanner_role() {
            return Err(VerificationError::WrongRole {
                phase: token.phase,
                role: scan.role,
            });
        }
        self.oracle
            .confirm(token, scan)
            .map_err(VerificationError::ScannerRejected)?;

        self.proximity.check(&token.bound_location, &scan.location)
    }
}
