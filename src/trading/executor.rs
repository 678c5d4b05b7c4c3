//! Trade executor: turns copy jobs into exchange orders.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::{ExchangeConnector, OrderRequest, PlacedOrder};
use crate::db::Database;
use crate::error::{CopyError, Result};
use crate::models::CopyJob;
use crate::notify::{failure_message, success_message, Notifier};
use crate::security::CredentialCipher;

use super::{execution_price, order_size, wait_for_shutdown, JobReceiver, PipelineConfig, ShutdownSignal};

/// Executes jobs on behalf of their users. Shared by every worker.
pub struct TradeExecutor {
    db: Arc<Database>,
    cipher: Arc<CredentialCipher>,
    connector: Arc<dyn ExchangeConnector>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

impl TradeExecutor {
    pub fn new(
        db: Arc<Database>,
        cipher: Arc<CredentialCipher>,
        connector: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            cipher,
            connector,
            notifier,
            config,
        }
    }

    /// Place the replica order for one job.
    pub async fn execute(&self, job: &CopyJob) -> Result<PlacedOrder> {
        let stored = self
            .db
            .get_credentials(job.user_id)
            .await?
            .ok_or(CopyError::NoCredentials(job.user_id))?;

        // decrypted credentials are wiped as soon as the session is built
        let exchange = {
            let credentials = self.cipher.decrypt(&stored)?;
            self.connector
                .connect(&credentials)
                .map_err(|e| CopyError::Exchange(format!("{:#}", e)))?
        };

        let book = exchange
            .get_order_book(&job.market_id)
            .await
            .map_err(|e| CopyError::Exchange(format!("{:#}", e)))?;

        let price = execution_price(&book, job.side, self.config.slippage, &job.market_id)?;
        let size = order_size(job.amount, price)?;

        let order = OrderRequest {
            market_id: job.market_id.clone(),
            side: job.side,
            price,
            size,
        };

        debug!(
            user_id = job.user_id,
            market = %job.market_id,
            side = %job.side,
            price = %price,
            size = %size,
            "Placing replica order"
        );

        exchange
            .place_order(&order)
            .await
            .map_err(|e| CopyError::Exchange(format!("{:#}", e)))
    }

    /// Execute, finalize the trade log, then notify the user.
    pub async fn process(&self, job: CopyJob) {
        let text = match self.execute(&job).await {
            Ok(placed) => {
                info!(
                    user_id = job.user_id,
                    subscription_id = job.subscription_id,
                    trade_hash = %job.trade_hash,
                    order_id = %placed.order_id,
                    "Trade copied"
                );
                match self.db.finalize_success(&job, &placed.order_id).await {
                    Ok(true) => {}
                    Ok(false) => debug!(trade_hash = %job.trade_hash, "Trade log already final"),
                    Err(e) => error!(trade_hash = %job.trade_hash, error = %e, "Failed to finalize trade log"),
                }
                success_message(&job)
            }
            Err(err) => {
                let message = err.display_message(self.config.error_max_len);
                warn!(
                    user_id = job.user_id,
                    subscription_id = job.subscription_id,
                    trade_hash = %job.trade_hash,
                    error = %message,
                    "Trade copy failed"
                );
                match self.db.finalize_failure(&job, &message).await {
                    Ok(true) => {}
                    Ok(false) => debug!(trade_hash = %job.trade_hash, "Trade log already final"),
                    Err(e) => error!(trade_hash = %job.trade_hash, error = %e, "Failed to finalize trade log"),
                }
                failure_message(&job, &message)
            }
        };

        if let Err(e) = self.notifier.send(job.user_id, &text).await {
            warn!(user_id = job.user_id, error = %e, "Failed to notify user");
        }
    }

    /// Drain the queue until it closes or shutdown arrives while idle. A job
    /// that was already taken is always finished.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize, jobs: JobReceiver, mut shutdown: ShutdownSignal) {
        info!(worker_id, "Executor worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.process(job).await;
        }

        info!(worker_id, "Executor worker stopped");
    }
}
