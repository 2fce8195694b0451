//! Server setup with Tower middleware

use std::net::SocketAddr;

use axum::Router;
use cgn_lifecycle::LifecycleService;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::routes;
use crate::state::AppState;

/// Web server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create the axum application with middleware.
pub fn create_app(service: LifecycleService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::create_router()
        .with_state(AppState::new(service))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Parse a `host:port` bind address.
///
/// # Errors
///
/// Returns `InvalidAddress` if `address` is not a socket address.
pub fn parse_bind(address: &str) -> Result<SocketAddr, ServerError> {
    address
        .parse::<SocketAddr>()
        .map_err(|e| ServerError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Run the axum server until the listener fails.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn run_server(addr: SocketAddr, service: LifecycleService) -> Result<(), ServerError> {
    let app = create_app(service);

    let listener = TcpListener::bind(addr).await?;
    info!("CGN API listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind() {
        assert!(parse_bind("127.0.0.1:8080").is_ok());
        assert!(matches!(
            parse_bind("not-an-address"),
            Err(ServerError::InvalidAddress { .. })
        ));
    }
}
