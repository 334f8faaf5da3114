//! State shared by every converter built by one engine.

use crate::config::EngineConfig;
use crate::deps::DependencyCache;
use crate::telemetry::Telemetry;
use std::sync::Arc;

#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub telemetry: Arc<Telemetry>,
    pub deps: Arc<DependencyCache>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            config,
            telemetry,
            deps: Arc::new(DependencyCache::new()),
        }
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Arc::new(Telemetry::in_memory()))
    }
}
