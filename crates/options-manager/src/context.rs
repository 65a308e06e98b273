use std::sync::Arc;

use daily_short_core::{Clock, RunConfig, SystemClock};
use daily_short_fivepaisa::BrokerGateway;

/// Shared handles for one run: the broker, the validated config and the
/// clock. Cheap to clone.
#[derive(Clone)]
pub struct TradingContext {
    pub gateway: Arc<dyn BrokerGateway>,
    pub config: Arc<RunConfig>,
    pub clock: Arc<dyn Clock>,
}

impl TradingContext {
    #[must_use]
    pub fn new(gateway: Arc<dyn BrokerGateway>, config: RunConfig) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for TradingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingContext")
            .field("index", &self.config.index)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
