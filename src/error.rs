//! Error taxonomy for the copy pipeline.

use thiserror::Error;

/// Errors surfaced by the poller, refresher and executor.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Bad status or transport failure on a trade-feed fetch. The address is
    /// skipped for the current cycle only.
    #[error("feed unavailable for {address}: {reason}")]
    Feed { address: String, reason: String },

    #[error("leaderboard unavailable: {0}")]
    Leaderboard(String),

    #[error("no credentials stored for user {0}")]
    NoCredentials(i64),

    #[error("failed to decrypt credentials: {0}")]
    Decrypt(String),

    #[error("no price available for market {market_id} ({side} side empty)")]
    EmptyBook { market_id: String, side: &'static str },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("invalid wallet address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CopyError>;

impl CopyError {
    /// Message suitable for a trade log row or a user notification.
    pub fn display_message(&self, max_len: usize) -> String {
        truncate(&self.to_string(), max_len)
    }
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}
