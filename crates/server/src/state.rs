use std::sync::Arc;

use fleet_core::{Clock, Config};
use fleet_rules::RuleCatalog;
use fleet_storage::FleetStore;

use crate::auth::KeyRing;
use crate::registry::SensorRegistry;
use crate::scheduler::LivenessScheduler;

/// Everything a request handler can reach.
pub struct AppState {
    pub config: Config,
    pub store: Arc<FleetStore>,
    pub registry: SensorRegistry,
    pub rules: RuleCatalog,
    pub keys: KeyRing,
}

impl AppState {
    pub fn new(config: Config, store: Arc<FleetStore>, clock: Arc<dyn Clock>) -> Self {
        let scheduler = LivenessScheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.liveness.thresholds(),
        );
        let registry = SensorRegistry::new(Arc::clone(&store), Arc::clone(&clock), scheduler);
        let rules = RuleCatalog::new(Arc::clone(&store), config.rules.clone(), clock);
        let keys = KeyRing::from_config(&config.auth);
        Self {
            config,
            store,
            registry,
            rules,
            keys,
        }
    }

    pub fn scheduler(&self) -> &LivenessScheduler {
        self.registry.scheduler()
    }
}
