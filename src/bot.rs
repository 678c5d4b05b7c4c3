//! Bot runner: wires the pipeline together and owns its lifetime.
//!
//! Spawns:
//! - the leaderboard refresher (when an oracle is configured)
//! - the trade poller, sole producer of the job queue
//! - N executor workers sharing the queue
//!
//! All of them observe one shutdown signal, raised on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::{
    ActivityFeed, ClobConnector, DataClient, DuneClient, ExchangeConnector, LeaderboardOracle,
};
use crate::db::Database;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};
use crate::security::CredentialCipher;
use crate::trading::{
    job_queue, LeaderboardRefresher, PipelineConfig, ShutdownSignal, TradeExecutor, TradePoller,
};

/// Runtime configuration for the whole process.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub pipeline: PipelineConfig,

    /// Timeout applied to every outbound HTTP request
    pub http_timeout: Duration,

    pub data_api_url: String,
    pub clob_url: String,
    pub chain_id: u64,

    /// Dune credentials; the top-PNL leader is not refreshed without them
    pub dune_api_key: Option<String>,
    pub dune_query_id: Option<String>,

    /// Telegram bot token; notifications go to the log without it
    pub telegram_token: Option<String>,
}

/// Main bot runner.
pub struct Bot {
    db: Arc<Database>,
    cipher: Arc<CredentialCipher>,
    feed: Arc<dyn ActivityFeed>,
    oracle: Option<Arc<dyn LeaderboardOracle>>,
    connector: Arc<dyn ExchangeConnector>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

impl Bot {
    /// Build the production clients from configuration.
    pub fn new(db: Arc<Database>, cipher: CredentialCipher, config: BotConfig) -> Result<Self> {
        let feed = DataClient::with_base_url(config.data_api_url.clone(), config.http_timeout)?;

        let oracle: Option<Arc<dyn LeaderboardOracle>> = match (&config.dune_api_key, &config.dune_query_id) {
            (Some(key), Some(query)) => Some(Arc::new(DuneClient::new(
                key.clone(),
                query.clone(),
                config.http_timeout,
            )?)),
            _ => {
                warn!("DUNE_API_KEY or DUNE_PNL_QUERY_ID not set, top PNL leader will not be refreshed");
                None
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.telegram_token {
            Some(token) => Arc::new(TelegramNotifier::new(token.clone(), config.http_timeout)?),
            None => {
                info!("TELEGRAM_TOKEN not set, notifications will be logged");
                Arc::new(LogNotifier)
            }
        };

        let connector = ClobConnector::new(config.clob_url.clone(), config.chain_id, config.http_timeout);

        Ok(Self::with_components(
            db,
            Arc::new(cipher),
            Arc::new(feed),
            oracle,
            Arc::new(connector),
            notifier,
            config.pipeline,
        ))
    }

    /// Assemble from ready-made components.
    pub fn with_components(
        db: Arc<Database>,
        cipher: Arc<CredentialCipher>,
        feed: Arc<dyn ActivityFeed>,
        oracle: Option<Arc<dyn LeaderboardOracle>>,
        connector: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            cipher,
            feed,
            oracle,
            connector,
            notifier,
            config,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        self.run_until(shutdown_rx).await
    }

    /// Run until the shutdown signal fires, then wait for every task.
    pub async fn run_until(self, shutdown: ShutdownSignal) -> Result<()> {
        let config = self.config.clone();
        info!(
            workers = config.worker_count,
            poll_interval = config.poll_interval_secs,
            slippage = %config.slippage,
            "Starting copy pipeline"
        );

        let (jobs_tx, jobs_rx) = job_queue();
        let mut handles = Vec::new();

        if let Some(oracle) = self.oracle.clone() {
            let refresher = LeaderboardRefresher::new(self.db.clone(), oracle, config.clone());
            handles.push(tokio::spawn(refresher.run(shutdown.clone())));
        }

        let poller = TradePoller::new(self.db.clone(), self.feed.clone(), jobs_tx, config.clone());
        handles.push(tokio::spawn(poller.run(shutdown.clone())));

        let executor = Arc::new(TradeExecutor::new(
            self.db.clone(),
            self.cipher.clone(),
            self.connector.clone(),
            self.notifier.clone(),
            config.clone(),
        ));
        for worker_id in 0..config.worker_count.max(1) {
            handles.push(tokio::spawn(executor.clone().run_worker(
                worker_id,
                jobs_rx.clone(),
                shutdown.clone(),
            )));
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Pipeline task panicked");
            }
        }

        let (pending, success, failed) = self.db.trade_log_stats().await?;
        info!(pending, success, failed, "Copy pipeline stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BookLevel, OrderBook};
    use crate::models::{TradeSide, TradeStatus};
    use crate::security::ApiCredentials;
    use crate::trading::testing::{trade, wallet, ExchangeState, FakeConnector, FakeFeed, FakeNotifier, FakeOracle};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_pipeline_copies_leader_trade_end_to_end() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let cipher = Arc::new(CredentialCipher::from_base64_key(&CredentialCipher::generate_key()).unwrap());

        let creds = ApiCredentials {
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
            api_passphrase: "p".to_string(),
            private_key: "0x01".to_string(),
        };
        db.save_credentials(1, &cipher.encrypt(&creds).unwrap()).await.unwrap();
        let sub = db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();

        let leader = wallet(8);
        let feed = Arc::new(FakeFeed::default());
        let t = trade("live", 100, TradeSide::Buy);
        feed.set(&leader, vec![t.clone()]);

        let exchange = Arc::new(ExchangeState::default());
        exchange.books.lock().unwrap().insert(
            t.market_id.clone(),
            OrderBook {
                bids: vec![],
                asks: vec![BookLevel { price: dec!(0.5), size: dec!(50) }],
            },
        );
        let notifier = Arc::new(FakeNotifier::default());

        let config = PipelineConfig {
            prime_new_sources: false,
            poll_interval_secs: 1,
            leaderboard_max_backoff_secs: 0,
            ..Default::default()
        };
        let bot = Bot::with_components(
            db.clone(),
            cipher,
            feed,
            Some(Arc::new(FakeOracle::new(Ok(leader.to_string())))),
            Arc::new(FakeConnector { state: exchange.clone() }),
            notifier.clone(),
            config,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(bot.run_until(stop_rx));

        let mut status = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            status = db.get_trade_log(sub.id, "live").await.unwrap().map(|l| l.status);
            if status == Some(TradeStatus::Success) {
                break;
            }
        }

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(3), run).await.unwrap().unwrap().unwrap();

        assert_eq!(status, Some(TradeStatus::Success));
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }
}
