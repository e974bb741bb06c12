//! HTTP API for the Overwatch control plane.
//!
//! Every route except `/health` requires a bearer API key mapped to an
//! operator or admin [`overwatch_security::Principal`]; admin routes
//! additionally check the privilege inside the control plane so denials land
//! in the audit trail. Domain errors map onto HTTP status codes in
//! [`ApiError`].

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::GatewayServer;
