pub mod clock;
pub mod config;
pub mod error;
pub mod liveness;
pub mod rule;
pub mod sensor;
pub mod version;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::Config;
pub use error::*;
pub use liveness::*;
pub use rule::*;
pub use sensor::*;
pub use version::RuleSetVersion;
