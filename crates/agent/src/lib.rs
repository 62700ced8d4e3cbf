//! Sensor-side agent: reports liveness to the console and converges the
//! local rule directory on the versions the console wants installed.

pub mod apply;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod reload;
pub mod runner;
pub mod state;

pub use config::AgentConfig;
pub use error::AgentError;
pub use reload::{reloader_for, CommandReloader, EngineReloader, NoReload};
pub use runner::{Agent, SyncSummary};
pub use state::InstalledVersions;
