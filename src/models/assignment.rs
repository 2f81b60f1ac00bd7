use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub payment_score: f64,
    pub profit_score: f64,
    pub fuel_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProfitabilityResult {
    pub distance_to_pickup_km: f64,
    pub extra_distance_km: f64,
    pub fuel_cost: f64,
    pub net_profit: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub mode: AssignmentMode,
    pub profitability: Option<ProfitabilityResult>,
    pub assigned_at: DateTime<Utc>,
}
