//! Periodic refresh of the top-PNL leader.

use std::sync::Arc;

use backoff::{future::retry, ExponentialBackoff};
use tracing::{debug, info, warn};

use crate::api::LeaderboardOracle;
use crate::db::Database;
use crate::error::{CopyError, Result};
use crate::models::WalletAddress;

use super::{sleep_or_shutdown, PipelineConfig, ShutdownSignal};

/// Asks the ranking oracle for the top wallet and caches it as the leader.
pub struct LeaderboardRefresher {
    db: Arc<Database>,
    oracle: Arc<dyn LeaderboardOracle>,
    config: PipelineConfig,
}

impl LeaderboardRefresher {
    pub fn new(db: Arc<Database>, oracle: Arc<dyn LeaderboardOracle>, config: PipelineConfig) -> Self {
        Self { db, oracle, config }
    }

    /// Query the oracle, with bounded retries. A zero backoff budget means a
    /// single attempt.
    async fn fetch_top_wallet(&self) -> Result<String> {
        let max_elapsed = self.config.leaderboard_max_backoff();

        let answer = if max_elapsed.is_zero() {
            self.oracle.top_wallet().await
        } else {
            let policy = ExponentialBackoff {
                max_elapsed_time: Some(max_elapsed),
                ..Default::default()
            };
            retry(policy, || async {
                self.oracle.top_wallet().await.map_err(|e| {
                    debug!(error = %e, "Leaderboard call failed, retrying");
                    backoff::Error::transient(e)
                })
            })
            .await
        };

        answer.map_err(|e| CopyError::Leaderboard(format!("{:#}", e)))
    }

    /// One refresh. On error the cached leader is left as it was.
    pub async fn refresh_once(&self) -> Result<WalletAddress> {
        let raw = self.fetch_top_wallet().await?;
        let address = WalletAddress::parse(&raw)?;

        if self.db.upsert_leader(&address).await? {
            info!(leader = %address, "Top PNL leader changed");
        } else {
            debug!(leader = %address, "Top PNL leader unchanged");
        }

        Ok(address)
    }

    /// Refresh now, then every interval until shutdown.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(
            interval_secs = self.config.leaderboard_interval_secs,
            "Starting leaderboard refresher"
        );

        loop {
            if let Err(e) = self.refresh_once().await {
                warn!(error = %e, "Leaderboard refresh failed, keeping previous leader");
            }

            if sleep_or_shutdown(self.config.leaderboard_interval(), &mut shutdown).await {
                break;
            }
        }

        info!("Leaderboard refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::testing::{wallet, FakeOracle};
    use std::time::Duration;
    use tokio::sync::watch;

    fn config() -> PipelineConfig {
        PipelineConfig {
            leaderboard_max_backoff_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_stores_normalized_leader() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let upper = format!("  0x{}  ", "AB".repeat(20));
        let oracle = Arc::new(FakeOracle::new(Ok(upper)));
        let refresher = LeaderboardRefresher::new(db.clone(), oracle, config());

        let leader = refresher.refresh_once().await.unwrap();
        assert_eq!(leader.as_str(), format!("0x{}", "ab".repeat(20)));
        assert_eq!(db.get_leader().await.unwrap().unwrap().address, leader);
    }

    #[tokio::test]
    async fn test_failures_keep_previous_leader() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let oracle = Arc::new(FakeOracle::new(Ok(wallet(1).to_string())));
        let refresher = LeaderboardRefresher::new(db.clone(), oracle.clone(), config());
        refresher.refresh_once().await.unwrap();

        oracle.set(Err("HTTP 503".to_string()));
        let err = refresher.refresh_once().await.unwrap_err();
        assert!(matches!(err, CopyError::Leaderboard(_)));

        oracle.set(Ok("0xnot-a-wallet".to_string()));
        let err = refresher.refresh_once().await.unwrap_err();
        assert!(matches!(err, CopyError::InvalidAddress(_)));

        assert_eq!(db.get_leader().await.unwrap().unwrap().address, wallet(1));
    }

    #[tokio::test]
    async fn test_run_refreshes_immediately_and_stops() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let oracle = Arc::new(FakeOracle::new(Ok(wallet(5).to_string())));
        let refresher = LeaderboardRefresher::new(db.clone(), oracle.clone(), config());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(refresher.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(*oracle.calls.lock().unwrap(), 1);
        assert_eq!(db.get_leader().await.unwrap().unwrap().address, wallet(5));
    }
}
