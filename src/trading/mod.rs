//! Copy pipeline: leaderboard refresher, trade poller, job queue, executor pool.

mod config;
mod executor;
mod leaderboard;
mod poller;
mod queue;
mod sizing;

use std::time::Duration;

use tokio::sync::watch;

pub use config::PipelineConfig;
pub use executor::TradeExecutor;
pub use leaderboard::LeaderboardRefresher;
pub use poller::TradePoller;
pub use queue::{job_queue, JobReceiver, JobSender};
pub use sizing::{execution_price, order_size};

/// Shared shutdown flag. `true` means stop.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut ShutdownSignal) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep, returning `true` if shutdown arrived first.
pub(crate) async fn sleep_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
