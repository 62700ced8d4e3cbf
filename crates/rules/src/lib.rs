//! Rule catalogue: indicator compilation, rule-set assembly and distribution.
//!
//! This crate provides:
//! - A pluggable [`RuleCompiler`] with the default Snort 3 dialect
//! - Idempotent conversion of an event's indicators into a draft rule set
//! - The content-addressed archive builder (write, digest, then publish)
//! - The additive deployer that records desired versions per sensor
//! - Read views over sets, items and per-sensor installed rules

pub mod builder;
pub mod compiler;
pub mod convert;
pub mod deploy;
pub mod views;

use std::sync::Arc;

use fleet_core::config::RulesConfig;
use fleet_core::Clock;
use fleet_storage::FleetStore;

pub use builder::{BuildOutcome, RULES_ENTRY_NAME};
pub use compiler::{rule_hash, Indicator, RuleBody, RuleCompiler, SnortCompiler};
pub use convert::{ConversionOutcome, ConversionStatus, EventRef};
pub use deploy::{DeployOutcome, DeployTarget};
pub use views::{InstalledRuleSet, RuleItemView, SensorRuleStats};

/// Entry point for every rule operation, sharing one store and clock.
pub struct RuleCatalog {
    store: Arc<FleetStore>,
    config: RulesConfig,
    clock: Arc<dyn Clock>,
    compiler: Box<dyn RuleCompiler>,
}

impl RuleCatalog {
    /// Catalogue using the Snort compiler configured from `config`.
    pub fn new(store: Arc<FleetStore>, config: RulesConfig, clock: Arc<dyn Clock>) -> Self {
        let compiler = Box::new(SnortCompiler::from_config(&config));
        Self::with_compiler(store, config, clock, compiler)
    }

    pub fn with_compiler(
        store: Arc<FleetStore>,
        config: RulesConfig,
        clock: Arc<dyn Clock>,
        compiler: Box<dyn RuleCompiler>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            compiler,
        }
    }

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.store
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    pub fn rules_config(base_dir: &Path) -> RulesConfig {
        RulesConfig {
            base_dir: base_dir.to_path_buf(),
            engine: "snort3".to_string(),
            home_net: "$HOME_NET".to_string(),
            external_net: "$EXTERNAL_NET".to_string(),
            sid_start: 3_000_000,
        }
    }

    /// In-memory catalogue frozen at 2025-01-01T00:00:00Z.
    pub fn catalog(base_dir: &Path) -> RuleCatalog {
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        RuleCatalog::new(
            Arc::new(FleetStore::in_memory()),
            rules_config(base_dir),
            Arc::new(clock),
        )
    }

    pub fn indicator(kind: &str, value: &str) -> Indicator {
        Indicator {
            indicator_type: kind.to_string(),
            value: value.to_string(),
            to_ids: true,
            attr_id: None,
            event_id: None,
            pulled_at: None,
        }
    }
}
