use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vehicles", post(create_vehicle).get(list_vehicles))
        .route("/vehicles/:id/status", patch(update_vehicle_status))
        .route("/vehicles/:id/location", patch(update_vehicle_location))
}

#[derive(Deserialize)]
pub struct CreateVehicleRequest {
    pub name: String,
    pub location: Coordinate,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: VehicleStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: Coordinate,
}

fn validate_location(location: &Coordinate) -> Result<(), AppError> {
    if location.is_valid() {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "location must be a valid lat/lng pair".to_string(),
        ))
    }
}

async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateVehicleRequest>,
) -> Result<Json<Vehicle>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    validate_location(&payload.location)?;

    let vehicle = Vehicle {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        status: VehicleStatus::Available,
        updated_at: Utc::now(),
    };

    state.vehicles.insert(vehicle.id, vehicle.clone());
    Ok(Json(vehicle))
}

async fn list_vehicles(State(state): State<Arc<AppState>>) -> Json<Vec<Vehicle>> {
    let vehicles = state
        .vehicles
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(vehicles)
}

async fn update_vehicle_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Vehicle>, AppError> {
    // A live trip drives its vehicle's status.
    if let Some(trip_id) = state.vehicle_holder(id) {
        return Err(AppError::Conflict(format!(
            "vehicle {id} is bound to trip {trip_id}"
        )));
    }

    let mut vehicle = state
        .vehicles
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {} not found", id)))?;

    vehicle.status = payload.status;
    vehicle.updated_at = Utc::now();

    Ok(Json(vehicle.clone()))
}

async fn update_vehicle_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Vehicle>, AppError> {
    validate_location(&payload.location)?;

    let mut vehicle = state
        .vehicles
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {} not found", id)))?;

    vehicle.location = payload.location;
    vehicle.updated_at = Utc::now();

    Ok(Json(vehicle.clone()))
}
