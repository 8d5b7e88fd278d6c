//! SlerfHub Ledger operator CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and install the stock catalog
//! slerfhub-ledger init
//!
//! # Register users, one referred by the other
//! slerfhub-ledger create-user --username alice
//! slerfhub-ledger create-user --username bob --referred-by ABCD1234
//!
//! # Move tokens
//! slerfhub-ledger credit --user alice --amount 5000
//! slerfhub-ledger stake --user alice --vault 1 --amount 1000
//! slerfhub-ledger claim-stake --user alice --stake 1
//! slerfhub-ledger mint --user alice --nft 1
//!
//! # Inspect
//! slerfhub-ledger balance --user alice
//! slerfhub-ledger stats
//! ```
//!
//! Output is JSON on stdout. Failures print the user-facing message on
//! stderr and exit non-zero.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use slerfhub_ledger::db::JournalEntry;
use slerfhub_ledger::services::{spawn_logging_listener, CreateUserInput};
use slerfhub_ledger::{Config, Ledger, LedgerError, LedgerResult};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "slerfhub-ledger")]
#[command(about = "Reward and staking ledger for SlerfHub")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "SLERFHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (database and config)
    #[arg(long, env = "SLERFHUB_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database and seed the stock catalog
    Init,

    /// List vaults, boosters, marketplace items and missions
    Catalog,

    /// Register a user
    CreateUser {
        #[arg(short, long)]
        username: String,
        /// Wallet address
        #[arg(short, long)]
        wallet: Option<String>,
        /// Referral code of the referring user
        #[arg(long)]
        referred_by: Option<String>,
    },

    /// Show a user's balance, stakes and holdings
    Balance {
        /// Username
        #[arg(short, long)]
        user: String,
    },

    /// Credit tokens to a user
    Credit {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        amount: i64,
        /// Journal reason
        #[arg(short, long, default_value = "admin_credit")]
        reason: String,
    },

    /// Stake tokens into a vault
    Stake {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        vault: i64,
        #[arg(short, long)]
        amount: i64,
    },

    /// Claim accrued staking rewards
    ClaimStake {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        stake: i64,
    },

    /// Close a stake and return principal plus rewards
    Unstake {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        stake: i64,
    },

    /// Mint an NFT booster
    Mint {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        nft: i64,
    },

    /// Buy a marketplace item
    Purchase {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        item: i64,
    },

    /// Referral stats for a user, or the leaderboard when no user is given
    Referrals {
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Platform and reward distribution statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("slerfhub_ledger=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    // Only `init` installs the stock catalog
    let seed = config.seed_catalog && matches!(args.command, Command::Init);
    config.seed_catalog = seed;

    let ledger = Ledger::open(&config)?;
    let _audit = spawn_logging_listener(ledger.events.clone());

    if matches!(args.command, Command::Init) {
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
    }

    let result = run(&ledger, &config.token_symbol, args.command);
    // Give the audit listener a turn before the runtime shuts down
    tokio::task::yield_now().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            if !e.is_business() {
                error!(error = %e, "Command failed");
            }
            eprintln!("error: {}", e.public_message());
            std::process::exit(1);
        }
    }
}

fn run(ledger: &Ledger, symbol: &str, command: Command) -> LedgerResult<Value> {
    let value = match command {
        Command::Init => json!({
            "database": ledger.platform_stats()?,
            "vaults": ledger.catalog.vaults()?,
        }),
        Command::Catalog => json!({
            "missions": ledger.catalog.missions()?,
            "quests": ledger.catalog.open_quests()?,
            "vaults": ledger.catalog.vaults()?,
            "games": ledger.catalog.games()?,
            "nftBoosters": ledger.catalog.nft_boosters()?,
            "marketplaceItems": ledger.catalog.marketplace_items()?,
        }),
        Command::CreateUser { username, wallet, referred_by } => {
            let input = CreateUserInput {
                username,
                wallet_address: wallet,
                referral_code: None,
            };
            match referred_by {
                Some(code) => {
                    let (user, referral) = ledger.rewards.create_user_with_referral(input, &code)?;
                    json!({ "user": user, "referral": referral })
                }
                None => json!({ "user": ledger.balances.create_user(input)?, "referral": null }),
            }
        }
        Command::Balance { user } => {
            let user = resolve(ledger, &user)?;
            json!({
                "username": user.username,
                "balance": user.balance,
                "symbol": symbol,
                "stakes": ledger.staking.user_stakes(user.id)?,
                "nfts": ledger.acquisitions.user_nfts(user.id)?,
                "purchases": ledger.acquisitions.user_purchases(user.id)?,
            })
        }
        Command::Credit { user, amount, reason } => {
            let user = resolve(ledger, &user)?;
            let balance = ledger.balances.credit(user.id, amount, JournalEntry::new(reason))?;
            json!({ "username": user.username, "balance": balance, "symbol": symbol })
        }
        Command::Stake { user, vault, amount } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.staking.stake(user.id, vault, amount)?)?
        }
        Command::ClaimStake { user, stake } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.staking.claim_rewards(stake, user.id)?)?
        }
        Command::Unstake { user, stake } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.staking.unstake(stake, user.id)?)?
        }
        Command::Mint { user, nft } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.acquisitions.mint_nft(user.id, nft)?)?
        }
        Command::Purchase { user, item } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.acquisitions.purchase_item(user.id, item)?)?
        }
        Command::Referrals { user: Some(user), .. } => {
            let user = resolve(ledger, &user)?;
            serde_json::to_value(ledger.referrals.stats(user.id)?)?
        }
        Command::Referrals { user: None, limit } => {
            serde_json::to_value(ledger.referrals.leaderboard(limit)?)?
        }
        Command::Stats => json!({
            "platform": ledger.platform_stats()?,
            "distribution": ledger.rewards.distribution_stats()?,
        }),
    };
    Ok(value)
}

fn resolve(ledger: &Ledger, username: &str) -> LedgerResult<slerfhub_ledger::db::UserRow> {
    ledger
        .balances
        .find_by_username(username)?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", username)))
}
