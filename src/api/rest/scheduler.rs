use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::engine::auto_scheduler::{self, AutoSchedulerStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduler/start", post(start))
        .route("/scheduler/stop", post(stop))
        .route("/scheduler/status", get(status))
        .route("/scheduler/run", post(run_now))
}

#[derive(Serialize)]
struct ToggleResponse {
    changed: bool,
    status: AutoSchedulerStatus,
}

#[derive(Serialize)]
struct RunResponse {
    passes: usize,
    status: AutoSchedulerStatus,
}

async fn start(State(state): State<Arc<AppState>>) -> Json<ToggleResponse> {
    let changed = auto_scheduler::start(&state).await;
    Json(ToggleResponse {
        changed,
        status: state.auto_scheduler.status().await,
    })
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<ToggleResponse> {
    let changed = state.auto_scheduler.stop().await;
    Json(ToggleResponse {
        changed,
        status: state.auto_scheduler.status().await,
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<AutoSchedulerStatus> {
    Json(state.auto_scheduler.status().await)
}

/// Runs one sweep now, whether or not the loop is running.
async fn run_now(State(state): State<Arc<AppState>>) -> Json<RunResponse> {
    let passes = auto_scheduler::sweep(&state).await;
    Json(RunResponse {
        passes,
        status: state.auto_scheduler.status().await,
    })
}
