//! Console side of the sensor fleet: registry, liveness scheduler, auth and
//! the HTTP API.

pub mod api;
pub mod auth;
pub mod cli;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod state;

pub use router::build_router;
pub use state::AppState;
