use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::ranking::{rank_vehicles, VehicleRanking};
use crate::engine::scoring::ScoringStrategy;
use crate::error::{AppError, DispatchError};
use crate::geo::Location;
use crate::models::load::{Load, LoadStatus};
use crate::models::vehicle::Vehicle;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/loads", post(create_load))
        .route("/loads/available", get(available_loads))
        .route("/loads/:id", get(get_load))
        .route("/loads/:id/reject", patch(reject_load))
        .route("/loads/:id/vehicles", get(rank_vehicles_for_load))
}

#[derive(Deserialize)]
pub struct CreateLoadRequest {
    pub vendor_id: Uuid,
    pub pickup: Location,
    pub destination: Location,
    pub weight_kg: f64,
    pub price_offered: f64,
}

#[derive(Deserialize)]
pub struct StrategyQuery {
    pub strategy: Option<ScoringStrategy>,
}

async fn create_load(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLoadRequest>,
) -> Result<Json<Load>, AppError> {
    if !payload.weight_kg.is_finite() || payload.weight_kg <= 0.0 {
        return Err(AppError::BadRequest("weight_kg must be > 0".to_string()));
    }
    if !payload.price_offered.is_finite() || payload.price_offered < 0.0 {
        return Err(AppError::BadRequest(
            "price_offered must be >= 0".to_string(),
        ));
    }

    let now = Utc::now();
    let load = Load {
        id: Uuid::new_v4(),
        vendor_id: payload.vendor_id,
        pickup: payload.pickup,
        destination: payload.destination,
        weight_kg: payload.weight_kg,
        price_offered: payload.price_offered,
        status: LoadStatus::Available,
        assigned_trip: None,
        created_at: now,
        updated_at: now,
    };

    let load = state.dispatch.publish_load(load).await?;
    info!(load_id = %load.id, vendor_id = %load.vendor_id, price = load.price_offered, "load published");

    Ok(Json(load))
}

async fn available_loads(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Load>>, AppError> {
    let loads = state.dispatch.available_loads().await?;
    Ok(Json(loads))
}

async fn get_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    let load = state
        .dispatch
        .load(id)
        .await?
        .ok_or(DispatchError::LoadNotFound(id))?;

    Ok(Json(load))
}

async fn reject_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    let load = state.dispatch.set_load_status(id, LoadStatus::Rejected).await?;
    info!(load_id = %id, "load rejected");
    Ok(Json(load))
}

async fn rank_vehicles_for_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<StrategyQuery>,
) -> Result<Json<VehicleRanking>, AppError> {
    let load = state
        .dispatch
        .load(id)
        .await?
        .ok_or(DispatchError::LoadNotFound(id))?;

    let vehicles: Vec<Vehicle> = state
        .vehicles
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    let weights = query
        .strategy
        .map(ScoringStrategy::weights)
        .unwrap_or_else(|| state.settings.weights());

    let start = Instant::now();
    let ranking = rank_vehicles(&vehicles, &load, &weights, &state.settings.costs);
    state
        .metrics
        .ranking_latency_seconds
        .with_label_values(&["vehicles_for_load"])
        .observe(start.elapsed().as_secs_f64());

    Ok(Json(ranking))
}
