//! Pipeline configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for the poller, refresher and executor pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Seconds between trade poll cycles
    pub poll_interval_secs: u64,

    /// Seconds between leaderboard refreshes
    pub leaderboard_interval_secs: u64,

    /// Upper bound on retrying one leaderboard call, in seconds
    pub leaderboard_max_backoff_secs: u64,

    /// Number of executor workers sharing the job queue
    pub worker_count: usize,

    /// Price slippage applied when crossing the book (0.0 to 1.0)
    pub slippage: Decimal,

    /// Feed entries requested per address per cycle
    pub feed_limit: u32,

    /// Record the newest timestamp without dispatching on a role's first fetch
    pub prime_new_sources: bool,

    /// Maximum stored length of a trade log error message
    pub error_max_len: usize,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn leaderboard_interval(&self) -> Duration {
        Duration::from_secs(self.leaderboard_interval_secs.max(1))
    }

    pub fn leaderboard_max_backoff(&self) -> Duration {
        Duration::from_secs(self.leaderboard_max_backoff_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            leaderboard_interval_secs: 3600,
            leaderboard_max_backoff_secs: 60,
            worker_count: 2,
            slippage: dec!(0.01),  // 1%
            feed_limit: 50,
            prime_new_sources: true,
            error_max_len: 256,
        }
    }
}
