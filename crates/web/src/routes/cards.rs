//! Card endpoints.
//!
//! - `POST /api/cards/{id}/activation` - Start activation
//! - `GET /api/cards/{id}/activation` - Query activation status
//! - `POST /api/cards/{id}/revocation` - Start revocation
//! - `POST /api/cards/{id}/expiration` - Start expiration
//! - `DELETE /api/cards/{id}` - Archive and delete the holder's data
//!
//! Triggers answer 202 with the lock outcome, whether or not a new instance
//! started.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use cgn_core::StatusTag;
use cgn_lifecycle::{ActivationDetail, StartOutcome};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::validation;

type Accepted = (StatusCode, Json<StartOutcome>);

fn accepted(outcome: StartOutcome) -> Accepted {
    (StatusCode::ACCEPTED, Json(outcome))
}

/// Body of a revocation request
#[derive(Debug, Deserialize)]
pub struct RevocationRequest {
    reason: String,
}

/// POST /api/cards/{id}/activation
pub async fn request_activation(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Accepted> {
    let holder_id = validation::holder_id(&id)?;
    let outcome = state.service.request_activation(&holder_id).await?;
    Ok(accepted(outcome))
}

/// GET /api/cards/{id}/activation
pub async fn activation_status(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ActivationDetail>> {
    let holder_id = validation::holder_id(&id)?;
    let detail = state
        .service
        .query_status(&holder_id, &[StatusTag::Activated])
        .await?;
    Ok(Json(detail))
}

/// POST /api/cards/{id}/revocation
pub async fn request_revocation(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RevocationRequest>,
) -> Result<Accepted> {
    let holder_id = validation::holder_id(&id)?;
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("Revocation reason cannot be empty".to_string()));
    }
    let outcome = state.service.request_revocation(&holder_id, reason).await?;
    Ok(accepted(outcome))
}

/// POST /api/cards/{id}/expiration
pub async fn request_expiration(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Accepted> {
    let holder_id = validation::holder_id(&id)?;
    let outcome = state.service.request_expiration(&holder_id).await?;
    Ok(accepted(outcome))
}

/// DELETE /api/cards/{id}
pub async fn request_deletion(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Accepted> {
    let holder_id = validation::holder_id(&id)?;
    let outcome = state.service.request_deletion(&holder_id).await?;
    Ok(accepted(outcome))
}
