use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::loads::StrategyQuery;
use crate::engine::ranking::LoadRanking;
use crate::engine::scheduler::{request_pass, SchedulingPhase};
use crate::engine::trips::{self, NewTrip, TokenOrder};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::verification::{VerificationStatus, VerificationToken};
use crate::state::{AppState, TripView};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/:id", get(get_trip))
        .route("/trips/:id/deadhead", patch(mark_deadheading))
        .route("/trips/:id/schedule", post(schedule))
        .route("/trips/:id/loads", get(rank_loads))
        .route("/trips/:id/accept", post(accept_load))
        .route("/trips/:id/abandon", post(abandon))
        .route("/trips/:id/assignment", get(get_assignment))
        .route("/trips/:id/tokens", post(issue_token))
        .route("/trips/:id/verification", get(verification_status))
}

#[derive(Deserialize)]
pub struct AcceptLoadRequest {
    pub load_id: Uuid,
}

#[derive(Serialize)]
struct ScheduleResponse {
    trip_id: Uuid,
    phase: SchedulingPhase,
}

async fn create_trip(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewTrip>,
) -> Result<Json<TripView>, AppError> {
    Ok(Json(trips::create_trip(&state, payload)?))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripView>, AppError> {
    Ok(Json(trips::trip_view(&state, id).await?))
}

async fn mark_deadheading(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripView>, AppError> {
    Ok(Json(trips::mark_deadheading(&state, id).await?))
}

async fn schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let phase = request_pass(&state, id).await?;
    Ok(Json(ScheduleResponse { trip_id: id, phase }))
}

async fn rank_loads(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<StrategyQuery>,
) -> Result<Json<LoadRanking>, AppError> {
    Ok(Json(trips::rank_loads_for_trip(&state, id, query.strategy).await?))
}

async fn accept_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptLoadRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(trips::accept_load(&state, id, payload.load_id).await?))
}

async fn abandon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripView>, AppError> {
    Ok(Json(trips::abandon(&state, id).await?))
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(trips::assignment(&state, id).await?))
}

async fn issue_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TokenOrder>,
) -> Result<Json<VerificationToken>, AppError> {
    Ok(Json(trips::issue_token(&state, id, payload).await?))
}

async fn verification_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VerificationStatus>, AppError> {
    state.trip(id)?;
    Ok(Json(state.verification.status(id)))
}
