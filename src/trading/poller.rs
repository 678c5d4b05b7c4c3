//! Trade poller: detects new source trades and dispatches copy jobs.
//!
//! Each cycle walks the watch list (tracked sources by id, then the current
//! leader), fetches every address once, and for each role on that address:
//! - keeps only trades newer than the role's watermark (feed is newest first)
//! - writes a PENDING log per active subscription, oldest trade first
//! - enqueues a job only when that log row was newly created
//! - advances the watermark once everything dispatched

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::ActivityFeed;
use crate::db::Database;
use crate::error::{CopyError, Result};
use crate::models::{CopyJob, DynamicLeader, Subscription, TrackedSource, TradeEvent, WalletAddress};

use super::{sleep_or_shutdown, JobSender, PipelineConfig, ShutdownSignal};

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct addresses on the watch list
    pub addresses: usize,
    /// Addresses whose feed was fetched successfully
    pub fetched: usize,
    /// Addresses skipped because the feed failed
    pub skipped: usize,
    /// Trades newer than their role's watermark
    pub new_trades: usize,
    /// Jobs enqueued
    pub jobs: usize,
}

/// Why an address is being watched.
#[derive(Debug, Clone)]
enum Role {
    Wallet(TrackedSource),
    Leader(DynamicLeader),
}

#[derive(Debug)]
struct WatchTarget {
    address: WalletAddress,
    roles: Vec<Role>,
}

/// Trades strictly newer than the watermark, newest first. Scanning stops at
/// the first stale entry.
fn new_trades(trades: &[TradeEvent], watermark: Option<i64>) -> &[TradeEvent] {
    let Some(watermark) = watermark else {
        return trades;
    };
    let fresh = trades
        .iter()
        .take_while(|t| t.timestamp > watermark)
        .count();
    &trades[..fresh]
}

pub struct TradePoller {
    db: Arc<Database>,
    feed: Arc<dyn ActivityFeed>,
    jobs: JobSender,
    config: PipelineConfig,
}

impl TradePoller {
    pub fn new(
        db: Arc<Database>,
        feed: Arc<dyn ActivityFeed>,
        jobs: JobSender,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            feed,
            jobs,
            config,
        }
    }

    /// Tracked sources in id order, then the leader. An address present in
    /// both gets both roles on a single target.
    async fn build_targets(&self) -> Result<Vec<WatchTarget>> {
        let mut targets: Vec<WatchTarget> = self
            .db
            .list_tracked_sources()
            .await?
            .into_iter()
            .map(|source| WatchTarget {
                address: source.address.clone(),
                roles: vec![Role::Wallet(source)],
            })
            .collect();

        if let Some(leader) = self.db.get_leader().await? {
            match targets.iter_mut().find(|t| t.address == leader.address) {
                Some(target) => target.roles.push(Role::Leader(leader)),
                None => targets.push(WatchTarget {
                    address: leader.address.clone(),
                    roles: vec![Role::Leader(leader)],
                }),
            }
        }

        Ok(targets)
    }

    /// Run one full cycle over the watch list.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let targets = self.build_targets().await?;
        let mut report = CycleReport {
            addresses: targets.len(),
            ..Default::default()
        };

        for target in targets {
            let trades = match self.feed.recent_trades(&target.address, self.config.feed_limit).await {
                Ok(trades) => trades,
                Err(e) => {
                    let err = CopyError::Feed {
                        address: target.address.to_string(),
                        reason: format!("{:#}", e),
                    };
                    warn!(address = %target.address, error = %err, "Skipping address this cycle");
                    report.skipped += 1;
                    continue;
                }
            };
            report.fetched += 1;

            for role in &target.roles {
                if let Err(e) = self.process_role(&target.address, role, &trades, &mut report).await {
                    error!(address = %target.address, error = %e, "Failed to process trades");
                }
            }
        }

        Ok(report)
    }

    async fn process_role(
        &self,
        address: &WalletAddress,
        role: &Role,
        trades: &[TradeEvent],
        report: &mut CycleReport,
    ) -> Result<()> {
        let watermark = match role {
            Role::Wallet(source) => source.last_seen_trade_ts,
            Role::Leader(leader) => leader.last_seen_trade_ts,
        };

        if watermark.is_none() && self.config.prime_new_sources {
            if let Some(newest) = trades.first() {
                self.advance(address, role, newest.timestamp).await?;
                info!(address = %address, watermark = newest.timestamp, "Primed watermark, history not replayed");
            }
            return Ok(());
        }

        let fresh = new_trades(trades, watermark);
        let Some(newest) = fresh.first() else {
            return Ok(());
        };
        report.new_trades += fresh.len();

        let subscriptions = match role {
            Role::Wallet(source) => self.db.active_subscriptions_for_source(source.id).await?,
            Role::Leader(_) => self.db.active_top_pnl_subscriptions().await?,
        };

        for trade in fresh.iter().rev() {
            for sub in &subscriptions {
                report.jobs += self.dispatch(sub, trade).await?;
            }
        }

        self.advance(address, role, newest.timestamp).await
    }

    /// Record the PENDING log and enqueue the job if the log is new.
    async fn dispatch(&self, sub: &Subscription, trade: &TradeEvent) -> Result<usize> {
        let outcome = self.db.record_pending(sub.id, trade).await?;
        if !outcome.should_dispatch() {
            debug!(subscription_id = sub.id, trade_hash = %trade.tx_hash, ?outcome, "Trade already dispatched");
            return Ok(0);
        }

        let job = CopyJob::new(sub.id, sub.user_id, sub.amount_per_trade, sub.mode(), trade);
        self.jobs
            .send(job)
            .map_err(|_| anyhow::anyhow!("job queue closed"))?;

        info!(
            subscription_id = sub.id,
            user_id = sub.user_id,
            trade_hash = %trade.tx_hash,
            market = %trade.market_id,
            side = %trade.side,
            "Dispatched copy job"
        );
        Ok(1)
    }

    async fn advance(&self, address: &WalletAddress, role: &Role, timestamp: i64) -> Result<()> {
        match role {
            Role::Wallet(source) => self.db.set_source_watermark(source.id, timestamp).await,
            Role::Leader(_) => self.db.set_leader_watermark(address, timestamp).await,
        }
    }

    /// Poll until shutdown. Errors never end the loop.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(
            interval_secs = self.config.poll_interval_secs,
            feed_limit = self.config.feed_limit,
            "Starting trade poller"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => debug!(?report, "Poll cycle finished"),
                Err(e) => error!(error = %e, "Poll cycle failed"),
            }

            if sleep_or_shutdown(self.config.poll_interval(), &mut shutdown).await {
                break;
            }
        }

        info!("Trade poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubscriptionMode, TradeSide, TradeStatus};
    use crate::trading::testing::{trade, wallet, FakeFeed};
    use crate::trading::{job_queue, JobReceiver};
    use rust_decimal_macros::dec;

    struct Harness {
        db: Arc<Database>,
        feed: Arc<FakeFeed>,
        poller: TradePoller,
        jobs: JobReceiver,
    }

    async fn harness(prime: bool) -> Harness {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let feed = Arc::new(FakeFeed::default());
        let (tx, rx) = job_queue();
        let config = PipelineConfig {
            prime_new_sources: prime,
            ..Default::default()
        };
        let poller = TradePoller::new(db.clone(), feed.clone(), tx, config);
        Harness { db, feed, poller, jobs: rx }
    }

    async fn drain(jobs: &JobReceiver) -> Vec<CopyJob> {
        let mut out = Vec::new();
        while let Ok(Some(job)) =
            tokio::time::timeout(std::time::Duration::from_millis(10), jobs.recv()).await
        {
            out.push(job);
        }
        out
    }

    #[test]
    fn test_new_trades_stops_at_watermark() {
        let feed = vec![
            trade("c", 30, TradeSide::Buy),
            trade("b", 20, TradeSide::Buy),
            trade("x", 25, TradeSide::Buy),
        ];
        assert_eq!(new_trades(&feed, Some(20)).len(), 1);
        assert_eq!(new_trades(&feed, Some(30)).len(), 0);
        assert_eq!(new_trades(&feed, None).len(), 3);
    }

    #[tokio::test]
    async fn test_dispatches_only_newer_trades_oldest_first() {
        let h = harness(false).await;
        let sub = h.db.upsert_wallet_subscription(7, &wallet(1), dec!(10)).await.unwrap();
        let source = h.db.get_source(&wallet(1)).await.unwrap().unwrap();
        h.db.set_source_watermark(source.id, 100).await.unwrap();

        h.feed.set(
            &wallet(1),
            vec![
                trade("t3", 130, TradeSide::Buy),
                trade("t2", 120, TradeSide::Sell),
                trade("t1", 100, TradeSide::Buy),
                trade("t0", 90, TradeSide::Buy),
            ],
        );

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.new_trades, 2);
        assert_eq!(report.jobs, 2);

        let jobs = drain(&h.jobs).await;
        let hashes: Vec<_> = jobs.iter().map(|j| j.trade_hash.as_str()).collect();
        assert_eq!(hashes, vec!["t2", "t3"]);
        assert_eq!(jobs[0].subscription_id, sub.id);
        assert_eq!(jobs[0].user_id, 7);
        assert_eq!(jobs[0].amount, dec!(10));
        assert_eq!(jobs[0].mode, SubscriptionMode::Wallet);

        let source = h.db.get_source(&wallet(1)).await.unwrap().unwrap();
        assert_eq!(source.last_seen_trade_ts, Some(130));

        let log = h.db.get_trade_log(sub.id, "t3").await.unwrap().unwrap();
        assert_eq!(log.status, TradeStatus::Pending);

        // a second pass over the same feed dispatches nothing
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.jobs, 0);
        assert!(drain(&h.jobs).await.is_empty());
    }

    #[tokio::test]
    async fn test_priming_records_watermark_without_dispatch() {
        let h = harness(true).await;
        h.db.upsert_wallet_subscription(1, &wallet(2), dec!(5)).await.unwrap();
        h.feed.set(&wallet(2), vec![trade("old2", 50, TradeSide::Buy), trade("old1", 40, TradeSide::Buy)]);

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.jobs, 0);
        assert_eq!(
            h.db.get_source(&wallet(2)).await.unwrap().unwrap().last_seen_trade_ts,
            Some(50)
        );

        h.feed.set(
            &wallet(2),
            vec![trade("new", 60, TradeSide::Buy), trade("old2", 50, TradeSide::Buy)],
        );
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.jobs, 1);
        assert_eq!(drain(&h.jobs).await[0].trade_hash, "new");
    }

    #[tokio::test]
    async fn test_watermark_unchanged_when_nothing_new() {
        let h = harness(false).await;
        h.db.upsert_wallet_subscription(1, &wallet(3), dec!(5)).await.unwrap();
        let source = h.db.get_source(&wallet(3)).await.unwrap().unwrap();
        h.db.set_source_watermark(source.id, 500).await.unwrap();
        h.feed.set(&wallet(3), vec![trade("a", 400, TradeSide::Buy)]);

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.new_trades, 0);
        assert_eq!(
            h.db.get_source(&wallet(3)).await.unwrap().unwrap().last_seen_trade_ts,
            Some(500)
        );
    }

    #[tokio::test]
    async fn test_feed_failure_does_not_block_other_addresses() {
        let h = harness(false).await;
        h.db.upsert_wallet_subscription(1, &wallet(1), dec!(5)).await.unwrap();
        h.db.upsert_wallet_subscription(1, &wallet(2), dec!(5)).await.unwrap();
        h.feed.fail(&wallet(1), "HTTP 500");
        h.feed.set(&wallet(2), vec![trade("ok", 10, TradeSide::Buy)]);

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.addresses, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.jobs, 1);
        assert_eq!(
            h.db.get_source(&wallet(1)).await.unwrap().unwrap().last_seen_trade_ts,
            None
        );
    }

    #[tokio::test]
    async fn test_leader_and_source_share_one_fetch() {
        let h = harness(false).await;
        let wallet_sub = h.db.upsert_wallet_subscription(1, &wallet(9), dec!(5)).await.unwrap();
        let top_sub = h.db.upsert_top_pnl_subscription(2, dec!(20)).await.unwrap();
        h.db.upsert_leader(&wallet(9)).await.unwrap();
        h.feed.set(&wallet(9), vec![trade("shared", 77, TradeSide::Sell)]);

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.addresses, 1);
        assert_eq!(h.feed.call_count(&wallet(9)), 1);
        assert_eq!(report.jobs, 2);

        let jobs = drain(&h.jobs).await;
        assert!(jobs.iter().any(|j| j.subscription_id == wallet_sub.id && j.mode == SubscriptionMode::Wallet));
        assert!(jobs.iter().any(|j| j.subscription_id == top_sub.id && j.mode == SubscriptionMode::TopPnl));

        assert_eq!(h.db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, Some(77));
        assert_eq!(
            h.db.get_source(&wallet(9)).await.unwrap().unwrap().last_seen_trade_ts,
            Some(77)
        );
    }

    #[tokio::test]
    async fn test_new_leader_is_primed_separately() {
        let h = harness(true).await;
        h.db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        h.db.upsert_leader(&wallet(1)).await.unwrap();
        h.feed.set(&wallet(1), vec![trade("a", 10, TradeSide::Buy)]);
        h.poller.run_cycle().await.unwrap();

        h.feed.set(&wallet(1), vec![trade("b", 20, TradeSide::Buy), trade("a", 10, TradeSide::Buy)]);
        assert_eq!(h.poller.run_cycle().await.unwrap().jobs, 1);

        // leader switches: the new address starts from its own newest trade
        h.db.upsert_leader(&wallet(2)).await.unwrap();
        h.feed.set(&wallet(2), vec![trade("z", 5, TradeSide::Buy)]);
        assert_eq!(h.poller.run_cycle().await.unwrap().jobs, 0);
        assert_eq!(h.db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, Some(5));
    }

    #[tokio::test]
    async fn test_reelected_leader_skips_trades_from_other_tenure() {
        let h = harness(true).await;
        h.db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();

        h.db.upsert_leader(&wallet(1)).await.unwrap();
        h.feed.set(&wallet(1), vec![trade("a1", 10, TradeSide::Buy)]);
        h.poller.run_cycle().await.unwrap();

        h.db.upsert_leader(&wallet(2)).await.unwrap();
        h.feed.set(&wallet(2), vec![]);
        assert_eq!(h.poller.run_cycle().await.unwrap().jobs, 0);

        // trades made while wallet(2) led are history, not new trades
        h.db.upsert_leader(&wallet(1)).await.unwrap();
        h.feed.set(
            &wallet(1),
            vec![
                trade("a3", 30, TradeSide::Buy),
                trade("a2", 20, TradeSide::Sell),
                trade("a1", 10, TradeSide::Buy),
            ],
        );
        assert_eq!(h.poller.run_cycle().await.unwrap().jobs, 0);
        assert!(drain(&h.jobs).await.is_empty());
        assert_eq!(h.db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, Some(30));

        h.feed.set(&wallet(1), vec![trade("a4", 40, TradeSide::Buy), trade("a3", 30, TradeSide::Buy)]);
        assert_eq!(h.poller.run_cycle().await.unwrap().jobs, 1);
        assert_eq!(drain(&h.jobs).await[0].trade_hash, "a4");
    }

    #[tokio::test]
    async fn test_run_survives_failed_cycle() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let feed = Arc::new(FakeFeed::default());
        let (tx, jobs) = job_queue();
        let config = PipelineConfig {
            prime_new_sources: false,
            poll_interval_secs: 1,
            ..Default::default()
        };

        // an unreadable source row makes every cycle fail to build its watch list
        sqlx::query("INSERT INTO tracked_sources (address) VALUES ('not-an-address')")
            .execute(db.pool())
            .await
            .unwrap();

        let poller = TradePoller::new(db.clone(), feed.clone(), tx, config);
        assert!(poller.run_cycle().await.is_err());

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let run = tokio::spawn(poller.run(stop_rx));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        sqlx::query("DELETE FROM tracked_sources WHERE address = 'not-an-address'")
            .execute(db.pool())
            .await
            .unwrap();
        let sub = db.upsert_wallet_subscription(1, &wallet(5), dec!(5)).await.unwrap();
        feed.set(&wallet(5), vec![trade("later", 10, TradeSide::Buy)]);

        let job = tokio::time::timeout(std::time::Duration::from_secs(3), jobs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.subscription_id, sub.id);
        assert_eq!(job.trade_hash, "later");

        stop_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_deactivated_subscription_not_dispatched() {
        let h = harness(false).await;
        h.db.upsert_wallet_subscription(1, &wallet(4), dec!(5)).await.unwrap();
        h.db.upsert_wallet_subscription(2, &wallet(4), dec!(5)).await.unwrap();
        h.db.deactivate_wallet_subscription(1, &wallet(4)).await.unwrap();
        h.feed.set(&wallet(4), vec![trade("t", 1, TradeSide::Buy)]);

        h.poller.run_cycle().await.unwrap();
        let jobs = drain(&h.jobs).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user_id, 2);
    }

    #[tokio::test]
    async fn test_redispatch_absorbed_by_trade_log() {
        let h = harness(false).await;
        let sub = h.db.upsert_wallet_subscription(1, &wallet(6), dec!(5)).await.unwrap();
        let t = trade("dup", 10, TradeSide::Buy);
        h.db.record_pending(sub.id, &t).await.unwrap();
        h.feed.set(&wallet(6), vec![t]);

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.new_trades, 1);
        assert_eq!(report.jobs, 0);
        assert_eq!(
            h.db.get_source(&wallet(6)).await.unwrap().unwrap().last_seen_trade_ts,
            Some(10)
        );
    }
}
