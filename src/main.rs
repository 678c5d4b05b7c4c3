//! Polymarket copy-trade relay
//!
//! Watches source wallets and the current top-PNL trader, and replicates
//! their trades for every subscribed user with the user's own exchange keys.

mod api;
mod bot;
mod db;
mod error;
mod models;
mod notify;
mod security;
mod trading;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{CLOB_URL, DATA_API_BASE, POLYGON_CHAIN_ID};
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::error::truncate;
use crate::models::WalletAddress;
use crate::security::{ApiCredentials, CredentialCipher};
use crate::trading::PipelineConfig;

/// Copy-trade relay CLI. Subcommands mirror the chat commands users send.
#[derive(Parser)]
#[command(name = "copyrelay")]
#[command(about = "Replicate Polymarket trades from chosen wallets or the top PNL trader", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./copyrelay.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Base64 32-byte key protecting stored credentials
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every trade of a wallet
    CopyWallet {
        user: i64,
        address: WalletAddress,
        /// USDC per copied trade
        amount: Decimal,
    },

    /// Copy whoever currently tops the PNL leaderboard
    CopyTopPnl {
        user: i64,
        /// USDC per copied trade
        amount: Decimal,
    },

    /// Stop copying a wallet
    StopWallet { user: i64, address: WalletAddress },

    /// Stop copying the top PNL trader
    StopTopPnl { user: i64 },

    /// Change the amount copied from a wallet
    ConfigWallet {
        user: i64,
        address: WalletAddress,
        amount: Decimal,
    },

    /// Change the amount copied from the top PNL trader
    ConfigTopPnl { user: i64, amount: Decimal },

    /// List a user's active subscriptions
    List { user: i64 },

    /// Show a user's most recent copied trades
    Status {
        user: i64,
        #[arg(short, long, default_value = "5")]
        limit: i64,
    },

    /// Store a user's exchange credentials, encrypted
    AddKeys {
        user: i64,
        #[arg(long, env = "POLYMARKET_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long, env = "POLYMARKET_API_SECRET", hide_env_values = true)]
        api_secret: String,
        #[arg(long, env = "POLYMARKET_API_PASSPHRASE", hide_env_values = true)]
        api_passphrase: String,
        #[arg(long, env = "POLYMARKET_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
    },

    /// Delete a user's stored credentials
    RemoveKeys { user: i64 },

    /// Show the cached top PNL leader
    Leader,

    /// Print a fresh ENCRYPTION_KEY
    GenerateKey,

    /// Show the default pipeline configuration
    Config,

    /// Start the copy pipeline
    Run {
        /// Seconds between trade polls
        #[arg(long, env = "POLL_INTERVAL", default_value = "5")]
        poll_interval: u64,

        /// Seconds between leaderboard refreshes
        #[arg(long, env = "LEADERBOARD_INTERVAL", default_value = "3600")]
        leaderboard_interval: u64,

        /// Executor workers
        #[arg(short, long, env = "WORKER_COUNT", default_value = "2")]
        workers: usize,

        /// Slippage applied when crossing the book (0.01 = 1%)
        #[arg(long, default_value = "0.01")]
        slippage: Decimal,

        /// Feed entries fetched per address per poll
        #[arg(long, default_value = "50")]
        feed_limit: u32,

        /// Dispatch a new source's existing history instead of skipping it
        #[arg(long)]
        replay_history: bool,

        /// HTTP request timeout in seconds
        #[arg(long, default_value = "30")]
        http_timeout: u64,

        #[arg(long, env = "DUNE_API_KEY", hide_env_values = true)]
        dune_api_key: Option<String>,

        #[arg(long, env = "DUNE_PNL_QUERY_ID")]
        dune_query_id: Option<String>,

        #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
        telegram_token: Option<String>,

        #[arg(long, env = "CLOB_URL", default_value = CLOB_URL)]
        clob_url: String,

        #[arg(long, env = "DATA_API_URL", default_value = DATA_API_BASE)]
        data_api_url: String,

        #[arg(long, env = "POLYMARKET_CHAIN_ID", default_value_t = POLYGON_CHAIN_ID)]
        chain_id: u64,
    },
}

fn load_cipher(key: Option<&str>) -> Result<CredentialCipher> {
    let key = key.context("ENCRYPTION_KEY is required (generate one with `copyrelay generate-key`)")?;
    CredentialCipher::from_base64_key(key)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Commands::GenerateKey = cli.command {
        println!("{}", CredentialCipher::generate_key());
        return Ok(());
    }

    if let Commands::Config = cli.command {
        let config = PipelineConfig::default();
        println!("\n=== Pipeline Configuration ===\n");
        println!("  Poll Interval:        {}s", config.poll_interval_secs);
        println!("  Leaderboard Interval: {}s", config.leaderboard_interval_secs);
        println!("  Leaderboard Retry:    {}s max", config.leaderboard_max_backoff_secs);
        println!("  Workers:              {}", config.worker_count);
        println!("  Slippage:             {}%", config.slippage * Decimal::from(100));
        println!("  Feed Limit:           {}", config.feed_limit);
        println!("  Prime New Sources:    {}", config.prime_new_sources);
        return Ok(());
    }

    // Initialize database
    let db = Database::new(&cli.database).await?;

    match cli.command {
        Commands::CopyWallet { user, address, amount } => {
            let sub = db.upsert_wallet_subscription(user, &address, amount).await?;
            info!(user_id = user, address = %address, amount = %amount, "Wallet subscription saved");
            println!("Now copying {}", sub.describe());
        }

        Commands::CopyTopPnl { user, amount } => {
            let sub = db.upsert_top_pnl_subscription(user, amount).await?;
            info!(user_id = user, amount = %amount, "Top PNL subscription saved");
            println!("Now copying {}", sub.describe());
        }

        Commands::StopWallet { user, address } => {
            if db.deactivate_wallet_subscription(user, &address).await? {
                println!("Stopped copying {}", address.short());
            } else {
                println!("No active subscription for {}", address.short());
            }
        }

        Commands::StopTopPnl { user } => {
            if db.deactivate_top_pnl_subscription(user).await? {
                println!("Stopped copying the top PNL trader");
            } else {
                println!("No active top PNL subscription");
            }
        }

        Commands::ConfigWallet { user, address, amount } => {
            if db.update_wallet_amount(user, &address, amount).await? {
                println!("Now copying ${:.2} per trade from {}", amount, address.short());
            } else {
                println!("No subscription for {}. Use 'copy-wallet' first.", address.short());
            }
        }

        Commands::ConfigTopPnl { user, amount } => {
            if db.update_top_pnl_amount(user, amount).await? {
                println!("Now copying ${:.2} per trade from the top PNL trader", amount);
            } else {
                println!("No top PNL subscription. Use 'copy-top-pnl' first.");
            }
        }

        Commands::List { user } => {
            let subs = db.list_active_subscriptions(user).await?;

            if subs.is_empty() {
                println!("No active subscriptions. Use 'copyrelay copy-wallet' or 'copy-top-pnl' to add one.");
                return Ok(());
            }

            println!("\n{:<6} {:<10} {}", "ID", "MODE", "TARGET");
            println!("{}", "-".repeat(60));
            for sub in subs {
                println!("{:<6} {:<10} {}", sub.id, sub.mode().as_str(), sub.describe());
            }
        }

        Commands::Status { user, limit } => {
            let logs = db.recent_trade_logs(user, limit.max(1)).await?;

            if logs.is_empty() {
                println!("No copied trades yet.");
                return Ok(());
            }

            for log in logs {
                let detail = match (&log.order_id, &log.error_message) {
                    (Some(order), _) => format!("order {}", order),
                    (None, Some(err)) => truncate(err, 50),
                    (None, None) => String::new(),
                };
                println!(
                    "{} {} {:<4} market {} {} {}",
                    log.created_at.format("%Y-%m-%d %H:%M:%S"),
                    log.status.marker(),
                    log.side.as_str(),
                    log.market_id,
                    log.status,
                    detail
                );
            }
        }

        Commands::AddKeys {
            user,
            api_key,
            api_secret,
            api_passphrase,
            private_key,
        } => {
            let cipher = load_cipher(cli.encryption_key.as_deref())?;
            let credentials = ApiCredentials {
                api_key,
                api_secret,
                api_passphrase,
                private_key,
            };
            let stored = cipher.encrypt(&credentials)?;
            db.save_credentials(user, &stored).await?;
            println!("Credentials stored for user {}", user);
        }

        Commands::RemoveKeys { user } => {
            if db.delete_credentials(user).await? {
                println!("Credentials removed for user {}", user);
            } else {
                println!("No credentials stored for user {}", user);
            }
        }

        Commands::Leader => match db.get_leader().await? {
            Some(leader) => {
                println!("Top PNL leader: {}", leader.address);
                println!("Last updated:   {}", leader.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
                if let Some(ts) = leader.last_seen_trade_ts {
                    println!("Last seen trade: {}", ts);
                }
            }
            None => println!("No leader cached yet. Start the pipeline with 'copyrelay run'."),
        },

        Commands::Run {
            poll_interval,
            leaderboard_interval,
            workers,
            slippage,
            feed_limit,
            replay_history,
            http_timeout,
            dune_api_key,
            dune_query_id,
            telegram_token,
            clob_url,
            data_api_url,
            chain_id,
        } => {
            let cipher = load_cipher(cli.encryption_key.as_deref())?;

            let pipeline = PipelineConfig {
                poll_interval_secs: poll_interval,
                leaderboard_interval_secs: leaderboard_interval,
                worker_count: workers,
                slippage,
                feed_limit,
                prime_new_sources: !replay_history,
                ..Default::default()
            };

            let config = BotConfig {
                pipeline,
                http_timeout: Duration::from_secs(http_timeout),
                data_api_url,
                clob_url,
                chain_id,
                dune_api_key: dune_api_key.filter(|k| !k.is_empty()),
                dune_query_id: dune_query_id.filter(|q| !q.is_empty()),
                telegram_token: telegram_token.filter(|t| !t.is_empty()),
            };

            let sources = db.list_tracked_sources().await?;
            println!("\n=== Polymarket Copy-Trade Relay ===");
            println!("Tracked wallets:  {}", sources.len());
            println!("Polling interval: {}s", poll_interval);
            println!("Workers:          {}", workers);
            println!("\nPress Ctrl+C to stop.\n");

            let bot = Bot::new(Arc::new(db), cipher, config)?;
            bot.run().await?;
        }

        Commands::GenerateKey | Commands::Config => {}
    }

    Ok(())
}
