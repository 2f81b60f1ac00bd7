use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::geo::{distance_km, Coordinate};
use crate::models::assignment::{ProfitabilityResult, ScoreBreakdown};
use crate::models::load::Load;

const MAX_SCORE: f64 = 100.0;
const DISTANCE_DECAY_KM_PER_POINT: f64 = 5.0;
const PAYMENT_PER_POINT: f64 = 200.0;
const PROFIT_PER_POINT: f64 = 150.0;
const FUEL_COST_PER_POINT: f64 = 30.0;

/// Where a vehicle is and, when it is heading home, where it will end up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VehiclePosition {
    pub current: Coordinate,
    pub destination: Option<Coordinate>,
}

impl VehiclePosition {
    pub fn at(current: Coordinate) -> Self {
        Self {
            current,
            destination: None,
        }
    }

    pub fn heading_to(current: Coordinate, destination: Coordinate) -> Self {
        Self {
            current,
            destination: Some(destination),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostModel {
    /// Litres per km.
    pub fuel_consumption_rate: f64,
    pub fuel_price_per_liter: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fuel_consumption_rate: 0.35,
            fuel_price_per_liter: 1.50,
        }
    }
}

impl CostModel {
    pub fn fuel_cost(&self, distance_km: f64) -> f64 {
        self.fuel_consumption_rate * distance_km * self.fuel_price_per_liter
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub distance: f64,
    pub payment: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub fuel: f64,
}

impl ScoreWeights {
    pub fn new(distance: f64, payment: f64, profit: f64, fuel: f64) -> Result<Self, ScoringError> {
        let weights = Self {
            distance,
            payment,
            profit,
            fuel,
        };

        let all = [distance, payment, profit, fuel];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ScoringError::InvalidWeights("weights must be finite and non-negative"));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ScoringError::InvalidWeights("at least one weight must be positive"));
        }

        Ok(weights)
    }

    pub fn apply(&self, breakdown: &ScoreBreakdown) -> f64 {
        let total = breakdown.distance_score * self.distance
            + breakdown.payment_score * self.payment
            + breakdown.profit_score * self.profit
            + breakdown.fuel_score * self.fuel;

        total.clamp(0.0, MAX_SCORE)
    }
}

/// Named weightings the dispatch desk has used for ranking loads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// 60% pickup distance, 40% payment.
    #[default]
    Balanced,
    /// 50% pickup distance, 30% net profit, 15% payment, 5% fuel.
    PickupProximity,
}

impl ScoringStrategy {
    pub fn weights(self) -> ScoreWeights {
        match self {
            ScoringStrategy::Balanced => ScoreWeights {
                distance: 0.6,
                payment: 0.4,
                profit: 0.0,
                fuel: 0.0,
            },
            ScoringStrategy::PickupProximity => ScoreWeights {
                distance: 0.5,
                payment: 0.15,
                profit: 0.3,
                fuel: 0.05,
            },
        }
    }
}

impl fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringStrategy::Balanced => f.write_str("balanced"),
            ScoringStrategy::PickupProximity => f.write_str("pickup_proximity"),
        }
    }
}

impl FromStr for ScoringStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(ScoringStrategy::Balanced),
            "pickup_proximity" => Ok(ScoringStrategy::PickupProximity),
            other => Err(format!(
                "unknown scoring strategy: {other}, expected balanced/pickup_proximity"
            )),
        }
    }
}

pub fn score(
    load: &Load,
    position: &VehiclePosition,
    weights: &ScoreWeights,
    costs: &CostModel,
) -> Result<ProfitabilityResult, ScoringError> {
    let pickup = load.pickup.coordinate().ok_or(ScoringError::MissingLocation {
        subject: "load",
        field: "pickup",
    })?;
    let drop_off = load
        .destination
        .coordinate()
        .ok_or(ScoringError::MissingLocation {
            subject: "load",
            field: "destination",
        })?;
    if !position.current.is_valid() {
        return Err(ScoringError::MissingLocation {
            subject: "vehicle",
            field: "current",
        });
    }

    let distance_to_pickup_km = distance_km(&position.current, &pickup);
    let extra_distance_km = extra_distance_km(position, &pickup, &drop_off);
    let fuel_cost = costs.fuel_cost(extra_distance_km);
    let net_profit = load.price_offered - fuel_cost;

    let breakdown = ScoreBreakdown {
        distance_score: distance_score(distance_to_pickup_km),
        payment_score: payment_score(load.price_offered),
        profit_score: profit_score(net_profit),
        fuel_score: fuel_score(fuel_cost),
    };

    Ok(ProfitabilityResult {
        distance_to_pickup_km,
        extra_distance_km,
        fuel_cost,
        net_profit,
        score: weights.apply(&breakdown),
        breakdown,
    })
}

fn extra_distance_km(position: &VehiclePosition, pickup: &Coordinate, drop_off: &Coordinate) -> f64 {
    let haul = distance_km(&position.current, pickup) + distance_km(pickup, drop_off);

    let detour = match position.destination.filter(Coordinate::is_valid) {
        Some(home) => {
            haul + distance_km(drop_off, &home) - distance_km(&position.current, &home)
        }
        None => haul,
    };

    detour.max(0.0)
}

fn distance_score(distance_km: f64) -> f64 {
    (MAX_SCORE - distance_km / DISTANCE_DECAY_KM_PER_POINT).clamp(0.0, MAX_SCORE)
}

fn payment_score(price_offered: f64) -> f64 {
    if price_offered <= 0.0 || !price_offered.is_finite() {
        return 0.0;
    }

    (price_offered / PAYMENT_PER_POINT).clamp(0.0, MAX_SCORE)
}

fn profit_score(net_profit: f64) -> f64 {
    (net_profit / PROFIT_PER_POINT).clamp(0.0, MAX_SCORE)
}

fn fuel_score(fuel_cost: f64) -> f64 {
    (MAX_SCORE - fuel_cost / FUEL_COST_PER_POINT).clamp(0.0, MAX_SCORE)
}
