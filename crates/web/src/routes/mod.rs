//! REST API routes
//!
//! ## Route Structure
//!
//! - `GET /api/health` - Health check endpoint
//! - `POST /api/cards/{id}/activation` - Start activation
//! - `GET /api/cards/{id}/activation` - Activation status
//! - `POST /api/cards/{id}/revocation` - Start revocation
//! - `POST /api/cards/{id}/expiration` - Start expiration
//! - `DELETE /api/cards/{id}` - Delete holder data

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;

pub mod cards;
pub mod health;

/// Create the API router. Every route lives under `/api`.
pub fn create_router() -> Router<AppState> {
    let api_routes = Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/cards/{id}/activation",
            post(cards::request_activation).get(cards::activation_status),
        )
        .route("/cards/{id}/revocation", post(cards::request_revocation))
        .route("/cards/{id}/expiration", post(cards::request_expiration))
        .route("/cards/{id}", delete(cards::request_deletion));

    Router::new().nest("/api", api_routes)
}
