use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::load::LoadStatus;
use crate::models::trip::TripStatus;
use crate::models::verification::{Phase, ScannerRole};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("{subject} has no usable {field} coordinate")]
    MissingLocation {
        subject: &'static str,
        field: &'static str,
    },

    #[error("invalid score weights: {0}")]
    InvalidWeights(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("cannot {event} while trip is {from}")]
    InvalidTransition { from: TripStatus, event: &'static str },

    #[error("trip origin and destination must have confirmed coordinates")]
    RouteUnconfirmed,

    #[error("{phase} verification for load {load_id} does not belong to this trip")]
    ProofMismatch { phase: Phase, load_id: Uuid },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerificationError {
    #[error("verification token {0} not found")]
    TokenNotFound(Uuid),

    #[error("verification token {0} was already used")]
    TokenReused(Uuid),

    #[error("verification token {0} has expired")]
    TokenExpired(Uuid),

    #[error("delivery token cannot be issued before pickup is verified for trip {0}")]
    PhaseOrder(Uuid),

    #[error("scan is {distance_m:.0}m from the bound location (limit {limit_m:.0}m)")]
    LocationMismatch { distance_m: f64, limit_m: f64 },

    #[error("{phase} token cannot be scanned by a {role}")]
    WrongRole { phase: Phase, role: ScannerRole },

    #[error("scanner rejected: {0}")]
    ScannerRejected(String),

    #[error("trip is {status}; {phase} token requires it to be {required}")]
    TripNotReady {
        phase: Phase,
        status: TripStatus,
        required: TripStatus,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("matching pass failed: {0}")]
    SchedulingPassFailed(String),

    #[error("load {0} not found")]
    LoadNotFound(Uuid),

    #[error("trip {0} is not registered with the load board")]
    TripNotRegistered(Uuid),

    #[error("load {load_id} is {status:?} and cannot be accepted")]
    LoadUnavailable { load_id: Uuid, status: LoadStatus },

    #[error("load {load_id} cannot move from {from:?} to {to:?}")]
    InvalidLoadStatus {
        load_id: Uuid,
        from: LoadStatus,
        to: LoadStatus,
    },

    #[error("dispatch backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Scoring(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transition(TransitionError::RouteUnconfirmed) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Transition(_) => StatusCode::CONFLICT,
            AppError::Verification(err) => match err {
                VerificationError::TokenNotFound(_) => StatusCode::NOT_FOUND,
                VerificationError::TokenReused(_)
                | VerificationError::PhaseOrder(_)
                | VerificationError::TripNotReady { .. } => StatusCode::CONFLICT,
                VerificationError::TokenExpired(_) => StatusCode::GONE,
                VerificationError::LocationMismatch { .. }
                | VerificationError::WrongRole { .. }
                | VerificationError::ScannerRejected(_) => StatusCode::FORBIDDEN,
            },
            AppError::Dispatch(err) => match err {
                DispatchError::LoadNotFound(_) | DispatchError::TripNotRegistered(_) => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::LoadUnavailable { .. }
                | DispatchError::InvalidLoadStatus { .. } => StatusCode::CONFLICT,
                DispatchError::SchedulingPassFailed(_) | DispatchError::Unavailable(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
