//! CGN Web Server
//!
//! HTTP API over the card lifecycle service, with tower middleware for CORS
//! and tracing. Errors are returned as RFC 7807 problem JSON.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use error::{AppError, ErrorResponse};
pub use server::{create_app, parse_bind, run_server, ServerError};
pub use state::AppState;
