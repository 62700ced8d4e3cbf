//! Durable document store for the console.
//!
//! Five collections live side by side under the data directory:
//! ```text
//! data/
//!   sensors.json          <- one document per sensor_id
//!   rule_items.json       <- append-only rule catalogue
//!   rule_sets.json        <- versioned rule sets
//!   rule_set_items.json   <- set <-> item links
//!   counters.json         <- sid sequence
//! ```
//! Every mutation rewrites the touched collection atomically (temp file +
//! rename). A failed write rolls the in-memory collection back, so memory
//! never runs ahead of disk.

mod catalog;
pub mod error;
mod sensors;
mod store;

pub use catalog::RuleItemUpsert;
pub use error::StorageError;
pub use sensors::BulkUpdate;
pub use store::FleetStore;

#[cfg(test)]
mod tests;
