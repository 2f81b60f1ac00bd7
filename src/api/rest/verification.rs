use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::trips::{self, VerificationOutcome};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::verification::{Scan, ScannerRole};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/verification/verify", post(verify))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token_id: Uuid,
    pub scanner_id: Uuid,
    pub role: ScannerRole,
    pub location: Coordinate,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerificationOutcome>, AppError> {
    if !payload.location.is_valid() {
        return Err(AppError::BadRequest(
            "location must be a valid lat/lng pair".to_string(),
        ));
    }

    let scan = Scan {
        scanner_id: payload.scanner_id,
        role: payload.role,
        location: payload.location,
    };
    Ok(Json(trips::verify_scan(&state, payload.token_id, scan).await?))
}
