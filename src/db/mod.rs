//! Database persistence for the copy pipeline.
//!
//! Stores everything the pipeline and the command surface share:
//! - Tracked source wallets and their watermarks
//! - User subscriptions (wallet or top-PNL)
//! - Trade logs, one row per (subscription, source trade)
//! - The cached top-PNL leader and its processing watermark
//! - Encrypted user credentials (read-only for the pipeline)

use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{CopyError, Result};
use crate::models::{
    CopyJob, DynamicLeader, Subscription, SubscriptionMode, SubscriptionTarget, TrackedSource,
    TradeEvent, TradeLog, TradeSide, TradeStatus, WalletAddress, TOP_PNL_ROLE,
};
use crate::security::EncryptedCredentials;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Outcome of writing a PENDING log for a (subscription, trade) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWrite {
    /// New row; the trade must be dispatched.
    Created,
    /// A PENDING row already existed and was refreshed in place.
    Refreshed,
    /// The pair already reached a terminal state.
    AlreadyFinal(TradeStatus),
}

impl PendingWrite {
    pub fn should_dispatch(&self) -> bool {
        matches!(self, PendingWrite::Created)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredSource {
    id: i64,
    address: String,
    last_seen_trade_ts: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredSubscription {
    id: i64,
    user_id: i64,
    mode: String,
    source_id: Option<i64>,
    source_address: Option<String>,
    amount_per_trade: String,
    active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTradeLog {
    id: i64,
    subscription_id: i64,
    source_trade_hash: String,
    market_id: String,
    outcome_index: i64,
    side: String,
    status: String,
    order_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredLeader {
    address: String,
    last_updated: DateTime<Utc>,
    watermark_address: Option<String>,
    last_seen_trade_ts: Option<i64>,
}

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT s.id, s.user_id, s.mode, s.source_id, t.address AS source_address,
           s.amount_per_trade, s.active
    FROM subscriptions s
    LEFT JOIN tracked_sources t ON t.id = s.source_id
"#;

impl TryFrom<StoredSource> for TrackedSource {
    type Error = CopyError;

    fn try_from(row: StoredSource) -> Result<Self> {
        Ok(TrackedSource {
            id: row.id,
            address: WalletAddress::parse(&row.address)?,
            last_seen_trade_ts: row.last_seen_trade_ts,
        })
    }
}

impl TryFrom<StoredSubscription> for Subscription {
    type Error = CopyError;

    fn try_from(row: StoredSubscription) -> Result<Self> {
        let mode = SubscriptionMode::parse(&row.mode)
            .ok_or_else(|| anyhow!("subscription {} has unknown mode {:?}", row.id, row.mode))?;

        let target = match (mode, row.source_id, row.source_address) {
            (SubscriptionMode::Wallet, Some(source_id), Some(address)) => SubscriptionTarget::Wallet {
                source_id,
                address: WalletAddress::parse(&address)?,
            },
            (SubscriptionMode::Wallet, _, _) => {
                return Err(anyhow!("wallet subscription {} has no source", row.id).into())
            }
            (SubscriptionMode::TopPnl, _, _) => SubscriptionTarget::TopPnl,
        };

        let amount_per_trade = Decimal::from_str(&row.amount_per_trade)
            .map_err(|e| anyhow!("subscription {} has bad amount: {}", row.id, e))?;

        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            target,
            amount_per_trade,
            active: row.active,
        })
    }
}

impl TryFrom<StoredTradeLog> for TradeLog {
    type Error = CopyError;

    fn try_from(row: StoredTradeLog) -> Result<Self> {
        let side = TradeSide::from_str(&row.side).map_err(|e| anyhow!(e))?;
        let status = TradeStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("trade log {} has unknown status {:?}", row.id, row.status))?;

        Ok(TradeLog {
            id: row.id,
            subscription_id: row.subscription_id,
            source_trade_hash: row.source_trade_hash,
            market_id: row.market_id,
            outcome_index: row.outcome_index,
            side,
            status,
            order_id: row.order_id,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

/// Largest per-trade amount accepted, in USDC.
pub const MAX_AMOUNT_PER_TRADE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(CopyError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount > MAX_AMOUNT_PER_TRADE {
        return Err(CopyError::InvalidAmount(format!(
            "amount must not exceed {}, got {}",
            MAX_AMOUNT_PER_TRADE, amount
        )));
    }
    Ok(())
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single pinned connection keeps the
    /// schema alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                last_seen_trade_ts INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                mode TEXT NOT NULL CHECK (mode IN ('WALLET', 'TOP_PNL')),
                source_id INTEGER REFERENCES tracked_sources(id),
                amount_per_trade TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CHECK ((mode = 'WALLET') = (source_id IS NOT NULL)),
                UNIQUE (user_id, source_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
                source_trade_hash TEXT NOT NULL,
                market_id TEXT NOT NULL,
                outcome_index INTEGER NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                order_id TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subscription_id, source_trade_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leader_cache (
                role TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                watermark_address TEXT,
                last_seen_trade_ts INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_credentials (
                user_id INTEGER PRIMARY KEY,
                api_key TEXT NOT NULL,
                api_secret TEXT NOT NULL,
                api_passphrase TEXT NOT NULL,
                private_key TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_top_pnl ON subscriptions(user_id) WHERE mode = 'TOP_PNL'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_source ON subscriptions(source_id, active)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_logs_created ON trade_logs(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Tracked Sources ====================

    async fn get_or_create_source_tx(
        tx: &mut Transaction<'_, Sqlite>,
        address: &WalletAddress,
    ) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO tracked_sources (address) VALUES (?)")
            .bind(address.as_str())
            .execute(&mut **tx)
            .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM tracked_sources WHERE address = ?")
            .bind(address.as_str())
            .fetch_one(&mut **tx)
            .await?;

        Ok(id)
    }

    /// Look up a tracked source by address.
    pub async fn get_source(&self, address: &WalletAddress) -> Result<Option<TrackedSource>> {
        let row = sqlx::query_as::<_, StoredSource>(
            "SELECT id, address, last_seen_trade_ts FROM tracked_sources WHERE address = ?",
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TrackedSource::try_from).transpose()
    }

    /// All tracked sources, oldest first.
    pub async fn list_tracked_sources(&self) -> Result<Vec<TrackedSource>> {
        let rows = sqlx::query_as::<_, StoredSource>(
            "SELECT id, address, last_seen_trade_ts FROM tracked_sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackedSource::try_from).collect()
    }

    /// Advance a source's watermark.
    pub async fn set_source_watermark(&self, source_id: i64, timestamp: i64) -> Result<()> {
        sqlx::query("UPDATE tracked_sources SET last_seen_trade_ts = ? WHERE id = ?")
            .bind(timestamp)
            .bind(source_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Subscriptions ====================

    /// Create or re-activate a wallet subscription, creating the tracked
    /// source on first use.
    pub async fn upsert_wallet_subscription(
        &self,
        user_id: i64,
        address: &WalletAddress,
        amount: Decimal,
    ) -> Result<Subscription> {
        require_positive(amount)?;

        let mut tx = self.pool.begin().await?;
        let source_id = Self::get_or_create_source_tx(&mut tx, address).await?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM subscriptions WHERE user_id = ? AND source_id = ?")
                .bind(user_id)
                .bind(source_id)
                .fetch_optional(&mut *tx)
                .await?;

        let id = match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE subscriptions SET amount_per_trade = ?, active = 1, updated_at = datetime('now') WHERE id = ?",
                )
                .bind(amount.to_string())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let row = sqlx::query(
                    "INSERT INTO subscriptions (user_id, mode, source_id, amount_per_trade) VALUES (?, 'WALLET', ?, ?) RETURNING id",
                )
                .bind(user_id)
                .bind(source_id)
                .bind(amount.to_string())
                .fetch_one(&mut *tx)
                .await?;
                sqlx::Row::get(&row, "id")
            }
        };

        tx.commit().await?;

        self.get_subscription(id)
            .await?
            .ok_or_else(|| anyhow!("subscription {} vanished after upsert", id).into())
    }

    /// Create or re-activate the user's top-PNL subscription.
    pub async fn upsert_top_pnl_subscription(&self, user_id: i64, amount: Decimal) -> Result<Subscription> {
        require_positive(amount)?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM subscriptions WHERE user_id = ? AND mode = 'TOP_PNL'")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let id = match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE subscriptions SET amount_per_trade = ?, active = 1, updated_at = datetime('now') WHERE id = ?",
                )
                .bind(amount.to_string())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let row = sqlx::query(
                    "INSERT INTO subscriptions (user_id, mode, source_id, amount_per_trade) VALUES (?, 'TOP_PNL', NULL, ?) RETURNING id",
                )
                .bind(user_id)
                .bind(amount.to_string())
                .fetch_one(&mut *tx)
                .await?;
                sqlx::Row::get(&row, "id")
            }
        };

        tx.commit().await?;

        self.get_subscription(id)
            .await?
            .ok_or_else(|| anyhow!("subscription {} vanished after upsert", id).into())
    }

    /// Deactivate a wallet subscription. Returns false if there was no active one.
    pub async fn deactivate_wallet_subscription(&self, user_id: i64, address: &WalletAddress) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET active = 0, updated_at = datetime('now')
            WHERE user_id = ? AND active = 1
              AND source_id = (SELECT id FROM tracked_sources WHERE address = ?)
            "#,
        )
        .bind(user_id)
        .bind(address.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate the user's top-PNL subscription. Returns false if it was not active.
    pub async fn deactivate_top_pnl_subscription(&self, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET active = 0, updated_at = datetime('now') WHERE user_id = ? AND mode = 'TOP_PNL' AND active = 1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change the per-trade amount of an existing wallet subscription.
    pub async fn update_wallet_amount(&self, user_id: i64, address: &WalletAddress, amount: Decimal) -> Result<bool> {
        require_positive(amount)?;

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET amount_per_trade = ?, updated_at = datetime('now')
            WHERE user_id = ?
              AND source_id = (SELECT id FROM tracked_sources WHERE address = ?)
            "#,
        )
        .bind(amount.to_string())
        .bind(user_id)
        .bind(address.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change the per-trade amount of the user's top-PNL subscription.
    pub async fn update_top_pnl_amount(&self, user_id: i64, amount: Decimal) -> Result<bool> {
        require_positive(amount)?;

        let result = sqlx::query(
            "UPDATE subscriptions SET amount_per_trade = ?, updated_at = datetime('now') WHERE user_id = ? AND mode = 'TOP_PNL'",
        )
        .bind(amount.to_string())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let sql = format!("{} WHERE s.id = ?", SUBSCRIPTION_SELECT);
        let row = sqlx::query_as::<_, StoredSubscription>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Subscription::try_from).transpose()
    }

    /// Active subscriptions of one user, wallet subscriptions first.
    pub async fn list_active_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE s.user_id = ? AND s.active = 1 ORDER BY s.mode DESC, s.id",
            SUBSCRIPTION_SELECT
        );
        let rows = sqlx::query_as::<_, StoredSubscription>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// Active wallet subscriptions targeting a tracked source.
    pub async fn active_subscriptions_for_source(&self, source_id: i64) -> Result<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE s.source_id = ? AND s.mode = 'WALLET' AND s.active = 1 ORDER BY s.id",
            SUBSCRIPTION_SELECT
        );
        let rows = sqlx::query_as::<_, StoredSubscription>(&sql)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// All active top-PNL subscriptions.
    pub async fn active_top_pnl_subscriptions(&self) -> Result<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE s.mode = 'TOP_PNL' AND s.active = 1 ORDER BY s.id",
            SUBSCRIPTION_SELECT
        );
        let rows = sqlx::query_as::<_, StoredSubscription>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    // ==================== Trade Logs ====================

    /// Write a PENDING log for (subscription, trade). Existing PENDING rows are
    /// refreshed in place; terminal rows are left untouched.
    pub async fn record_pending(&self, subscription_id: i64, trade: &TradeEvent) -> Result<PendingWrite> {
        let now = Utc::now();
        // created_at is only written on insert, so it equals updated_at
        // exactly when the row is new
        let written: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO trade_logs (
                subscription_id, source_trade_hash, market_id, outcome_index,
                side, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)
            ON CONFLICT (subscription_id, source_trade_hash) DO UPDATE SET
                market_id = excluded.market_id,
                outcome_index = excluded.outcome_index,
                side = excluded.side,
                updated_at = excluded.updated_at
            WHERE trade_logs.status = 'PENDING'
            RETURNING created_at = updated_at
            "#,
        )
        .bind(subscription_id)
        .bind(&trade.tx_hash)
        .bind(&trade.market_id)
        .bind(trade.outcome_index)
        .bind(trade.side.as_str())
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let outcome = match written {
            Some((1,)) => PendingWrite::Created,
            Some(_) => PendingWrite::Refreshed,
            None => {
                // terminal rows never change again, so a plain read is stable
                let (raw,): (String,) = sqlx::query_as(
                    "SELECT status FROM trade_logs WHERE subscription_id = ? AND source_trade_hash = ?",
                )
                .bind(subscription_id)
                .bind(&trade.tx_hash)
                .fetch_one(&self.pool)
                .await?;

                match TradeStatus::parse(&raw) {
                    Some(status) if status.is_terminal() => PendingWrite::AlreadyFinal(status),
                    _ => {
                        return Err(anyhow!(
                            "trade log ({}, {}) has unexpected status {:?}",
                            subscription_id,
                            trade.tx_hash,
                            raw
                        )
                        .into())
                    }
                }
            }
        };

        debug!(
            subscription_id,
            trade_hash = %trade.tx_hash,
            outcome = ?outcome,
            "Recorded pending trade log"
        );

        Ok(outcome)
    }

    /// Finalize a job's log as SUCCESS.
    pub async fn finalize_success(&self, job: &CopyJob, order_id: &str) -> Result<bool> {
        self.finalize(job, TradeStatus::Success, Some(order_id), None).await
    }

    /// Finalize a job's log as FAILED.
    pub async fn finalize_failure(&self, job: &CopyJob, error: &str) -> Result<bool> {
        self.finalize(job, TradeStatus::Failed, None, Some(error)).await
    }

    /// Move a log to a terminal state, creating it if it is missing. Returns
    /// false when the row was already terminal.
    async fn finalize(
        &self,
        job: &CopyJob,
        status: TradeStatus,
        order_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO trade_logs (
                subscription_id, source_trade_hash, market_id, outcome_index, side,
                status, order_id, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (subscription_id, source_trade_hash) DO UPDATE SET
                status = excluded.status,
                order_id = excluded.order_id,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            WHERE trade_logs.status = 'PENDING'
            "#,
        )
        .bind(job.subscription_id)
        .bind(&job.trade_hash)
        .bind(&job.market_id)
        .bind(job.outcome_index)
        .bind(job.side.as_str())
        .bind(status.as_str())
        .bind(order_id)
        .bind(error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_trade_log(&self, subscription_id: i64, trade_hash: &str) -> Result<Option<TradeLog>> {
        let row = sqlx::query_as::<_, StoredTradeLog>(
            r#"
            SELECT id, subscription_id, source_trade_hash, market_id, outcome_index, side,
                   status, order_id, error_message, created_at
            FROM trade_logs WHERE subscription_id = ? AND source_trade_hash = ?
            "#,
        )
        .bind(subscription_id)
        .bind(trade_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TradeLog::try_from).transpose()
    }

    /// Most recent trade logs across all of a user's subscriptions.
    pub async fn recent_trade_logs(&self, user_id: i64, limit: i64) -> Result<Vec<TradeLog>> {
        let rows = sqlx::query_as::<_, StoredTradeLog>(
            r#"
            SELECT l.id, l.subscription_id, l.source_trade_hash, l.market_id, l.outcome_index,
                   l.side, l.status, l.order_id, l.error_message, l.created_at
            FROM trade_logs l
            JOIN subscriptions s ON s.id = l.subscription_id
            WHERE s.user_id = ?
            ORDER BY l.created_at DESC, l.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TradeLog::try_from).collect()
    }

    /// Count of logs per status: (pending, success, failed).
    pub async fn trade_log_stats(&self) -> Result<(i64, i64, i64)> {
        let (pending, success, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(status = 'PENDING'), 0),
                COALESCE(SUM(status = 'SUCCESS'), 0),
                COALESCE(SUM(status = 'FAILED'), 0)
            FROM trade_logs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((pending, success, failed))
    }

    // ==================== Leader Cache ====================

    pub async fn get_leader(&self) -> Result<Option<DynamicLeader>> {
        let row = sqlx::query_as::<_, StoredLeader>(
            "SELECT address, last_updated, watermark_address, last_seen_trade_ts FROM leader_cache WHERE role = ?",
        )
        .bind(TOP_PNL_ROLE)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let address = WalletAddress::parse(&row.address)?;
        let last_seen_trade_ts = match row.watermark_address {
            Some(ref w) if w == address.as_str() => row.last_seen_trade_ts,
            _ => None,
        };

        Ok(Some(DynamicLeader {
            address,
            last_updated: row.last_updated,
            last_seen_trade_ts,
        }))
    }

    /// Store the current leader. Returns true when the address changed, in
    /// which case the previous leader's watermark is dropped.
    pub async fn upsert_leader(&self, address: &WalletAddress) -> Result<bool> {
        let now = Utc::now();

        let switched: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO leader_cache (role, address, last_updated) VALUES (?, ?, ?)
            ON CONFLICT (role) DO UPDATE SET
                address = excluded.address,
                last_updated = excluded.last_updated,
                watermark_address = NULL,
                last_seen_trade_ts = NULL
            WHERE leader_cache.address != excluded.address
            RETURNING address
            "#,
        )
        .bind(TOP_PNL_ROLE)
        .bind(address.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if switched.is_some() {
            return Ok(true);
        }

        sqlx::query("UPDATE leader_cache SET last_updated = ? WHERE role = ?")
            .bind(now)
            .bind(TOP_PNL_ROLE)
            .execute(&self.pool)
            .await?;

        Ok(false)
    }

    /// Persist the processing watermark for the leader address it belongs to.
    /// Ignored if the leader has changed since.
    pub async fn set_leader_watermark(&self, address: &WalletAddress, timestamp: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leader_cache SET watermark_address = address, last_seen_trade_ts = ?
            WHERE role = ? AND address = ?
            "#,
        )
        .bind(timestamp)
        .bind(TOP_PNL_ROLE)
        .bind(address.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Credentials ====================

    pub async fn get_credentials(&self, user_id: i64) -> Result<Option<EncryptedCredentials>> {
        let row = sqlx::query_as::<_, EncryptedCredentials>(
            "SELECT api_key, api_secret, api_passphrase, private_key FROM user_credentials WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn save_credentials(&self, user_id: i64, creds: &EncryptedCredentials) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, api_key, api_secret, api_passphrase, private_key)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                api_key = excluded.api_key,
                api_secret = excluded.api_secret,
                api_passphrase = excluded.api_passphrase,
                private_key = excluded.private_key,
                updated_at = datetime('now')
            "#,
        )
        .bind(user_id)
        .bind(&creds.api_key)
        .bind(&creds.api_secret)
        .bind(&creds.api_passphrase)
        .bind(&creds.private_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_credentials(&self, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn addr(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn trade(hash: &str, ts: i64) -> TradeEvent {
        TradeEvent {
            tx_hash: hash.to_string(),
            market_id: "tok-1".to_string(),
            outcome_index: 0,
            side: TradeSide::Buy,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_wallet_subscription_upsert_reactivates() {
        let db = Database::in_memory().await.unwrap();

        let first = db.upsert_wallet_subscription(1, &addr(1), dec!(10)).await.unwrap();
        assert!(db.deactivate_wallet_subscription(1, &addr(1)).await.unwrap());
        assert!(!db.deactivate_wallet_subscription(1, &addr(1)).await.unwrap());

        let second = db.upsert_wallet_subscription(1, &addr(1), dec!(25)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.active);
        assert_eq!(second.amount_per_trade, dec!(25));

        // one tracked source, shared across users
        db.upsert_wallet_subscription(2, &addr(1), dec!(5)).await.unwrap();
        assert_eq!(db.list_tracked_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_top_pnl_subscription_is_unique_per_user() {
        let db = Database::in_memory().await.unwrap();

        let a = db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        let b = db.upsert_top_pnl_subscription(1, dec!(20)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.target, SubscriptionTarget::TopPnl);

        let raw = sqlx::query(
            "INSERT INTO subscriptions (user_id, mode, source_id, amount_per_trade) VALUES (1, 'TOP_PNL', NULL, '3')",
        )
        .execute(db.pool())
        .await;
        assert!(raw.is_err());

        assert_eq!(db.active_top_pnl_subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let db = Database::in_memory().await.unwrap();

        let err = db.upsert_top_pnl_subscription(1, dec!(0)).await.unwrap_err();
        assert!(matches!(err, CopyError::InvalidAmount(_)));
        let err = db.upsert_wallet_subscription(1, &addr(2), dec!(-1)).await.unwrap_err();
        assert!(matches!(err, CopyError::InvalidAmount(_)));
        assert!(db.list_tracked_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_amount_rejected() {
        let db = Database::in_memory().await.unwrap();

        let err = db
            .upsert_top_pnl_subscription(1, dec!(70000000000000000000000000000))
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::InvalidAmount(_)));
        assert!(db.list_active_subscriptions(1).await.unwrap().is_empty());

        db.upsert_top_pnl_subscription(1, MAX_AMOUNT_PER_TRADE).await.unwrap();
        let err = db.update_top_pnl_amount(1, MAX_AMOUNT_PER_TRADE + dec!(1)).await.unwrap_err();
        assert!(matches!(err, CopyError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_update_amounts() {
        let db = Database::in_memory().await.unwrap();

        assert!(!db.update_top_pnl_amount(1, dec!(9)).await.unwrap());
        db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        assert!(db.update_top_pnl_amount(1, dec!(9)).await.unwrap());

        assert!(!db.update_wallet_amount(1, &addr(3), dec!(4)).await.unwrap());
        db.upsert_wallet_subscription(1, &addr(3), dec!(10)).await.unwrap();
        assert!(db.update_wallet_amount(1, &addr(3), dec!(4)).await.unwrap());

        let subs = db.list_active_subscriptions(1).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].mode(), SubscriptionMode::Wallet);
        assert_eq!(subs[0].amount_per_trade, dec!(4));
        assert_eq!(subs[1].amount_per_trade, dec!(9));
    }

    #[tokio::test]
    async fn test_pending_then_finalize_never_duplicates() {
        let db = Database::in_memory().await.unwrap();
        let sub = db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        let t = trade("0xhash", 100);

        assert_eq!(db.record_pending(sub.id, &t).await.unwrap(), PendingWrite::Created);
        assert_eq!(db.record_pending(sub.id, &t).await.unwrap(), PendingWrite::Refreshed);

        let job = CopyJob::new(sub.id, 1, dec!(10), SubscriptionMode::TopPnl, &t);
        assert!(db.finalize_success(&job, "order-1").await.unwrap());
        // terminal rows never transition again
        assert!(!db.finalize_failure(&job, "late failure").await.unwrap());
        assert_eq!(
            db.record_pending(sub.id, &t).await.unwrap(),
            PendingWrite::AlreadyFinal(TradeStatus::Success)
        );

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_logs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let log = db.get_trade_log(sub.id, "0xhash").await.unwrap().unwrap();
        assert_eq!(log.status, TradeStatus::Success);
        assert_eq!(log.order_id.as_deref(), Some("order-1"));
        assert!(log.error_message.is_none());
    }

    #[tokio::test]
    async fn test_finalize_creates_missing_row() {
        let db = Database::in_memory().await.unwrap();
        let sub = db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        let job = CopyJob::new(sub.id, 1, dec!(10), SubscriptionMode::TopPnl, &trade("0xabc", 1));

        assert!(db.finalize_failure(&job, "boom").await.unwrap());
        let log = db.get_trade_log(sub.id, "0xabc").await.unwrap().unwrap();
        assert_eq!(log.status, TradeStatus::Failed);
        assert_eq!(log.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_recent_trade_logs_scoped_to_user() {
        let db = Database::in_memory().await.unwrap();
        let mine = db.upsert_top_pnl_subscription(1, dec!(10)).await.unwrap();
        let theirs = db.upsert_top_pnl_subscription(2, dec!(10)).await.unwrap();

        for i in 0..7 {
            db.record_pending(mine.id, &trade(&format!("0x{}", i), i)).await.unwrap();
        }
        db.record_pending(theirs.id, &trade("0xother", 1)).await.unwrap();

        let logs = db.recent_trade_logs(1, 5).await.unwrap();
        assert_eq!(logs.len(), 5);
        assert_eq!(logs[0].source_trade_hash, "0x6");
        assert!(logs.iter().all(|l| l.subscription_id == mine.id));
        assert_eq!(db.trade_log_stats().await.unwrap(), (8, 0, 0));
    }

    #[tokio::test]
    async fn test_leader_watermark_tied_to_address() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.get_leader().await.unwrap().is_none());

        assert!(db.upsert_leader(&addr(1)).await.unwrap());
        assert!(!db.upsert_leader(&addr(1)).await.unwrap());
        db.set_leader_watermark(&addr(1), 500).await.unwrap();
        assert_eq!(db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, Some(500));

        // a new leader starts without a watermark
        assert!(db.upsert_leader(&addr(2)).await.unwrap());
        let leader = db.get_leader().await.unwrap().unwrap();
        assert_eq!(leader.address, addr(2));
        assert_eq!(leader.last_seen_trade_ts, None);

        // a late write for the old leader does not stick to the new one
        db.set_leader_watermark(&addr(1), 900).await.unwrap();
        assert_eq!(db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, None);

        // re-election starts over instead of resuming the old watermark
        assert!(db.upsert_leader(&addr(1)).await.unwrap());
        assert_eq!(db.get_leader().await.unwrap().unwrap().last_seen_trade_ts, None);
    }

    #[tokio::test]
    async fn test_credentials_roundtrip_and_delete() {
        let db = Database::in_memory().await.unwrap();
        let creds = EncryptedCredentials {
            api_key: "a".into(),
            api_secret: "b".into(),
            api_passphrase: "c".into(),
            private_key: "d".into(),
        };

        assert!(db.get_credentials(9).await.unwrap().is_none());
        db.save_credentials(9, &creds).await.unwrap();
        assert_eq!(db.get_credentials(9).await.unwrap(), Some(creds));
        assert!(db.delete_credentials(9).await.unwrap());
        assert!(!db.delete_credentials(9).await.unwrap());
    }
}
