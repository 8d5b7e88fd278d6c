//! Reward catalog
//!
//! Resolves the amount a reward is worth. Mission, quest and game rewards
//! come from their definition rows; everything else comes from the
//! configured [`RewardRates`]. Amounts are looked up at claim time, so a
//! changed rate never rewrites history in the journal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::RewardRates;
use crate::db::definitions::{self, *};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriviaKind {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    First,
    Second,
    CrossChain,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::First => "first",
            WalletKind::Second => "second",
            WalletKind::CrossChain => "cross_chain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Twitter,
    Discord,
    Github,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Discord => "discord",
            SocialPlatform::Github => "github",
        }
    }
}

impl FromStr for SocialPlatform {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(SocialPlatform::Twitter),
            "discord" => Ok(SocialPlatform::Discord),
            "github" => Ok(SocialPlatform::Github),
            other => Err(LedgerError::InvalidInput(format!("unknown social platform '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralRole {
    Referrer,
    Referee,
}

/// Every reward the ledger knows how to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardKind {
    Mission { mission_id: i64 },
    Quest { quest_id: i64 },
    Trivia { kind: TriviaKind, correct: u32, total: u32 },
    Wallet { kind: WalletKind },
    Social { platform: SocialPlatform },
    Referral { role: ReferralRole },
    GameHighScore { game_id: i64 },
}

impl RewardKind {
    /// Journal reason. Every reward reason ends in `_reward`.
    pub fn reason(&self) -> &'static str {
        match self {
            RewardKind::Mission { .. } => "mission_reward",
            RewardKind::Quest { .. } => "quest_reward",
            RewardKind::Trivia { .. } => "trivia_reward",
            RewardKind::Wallet { .. } => "wallet_reward",
            RewardKind::Social { .. } => "social_reward",
            RewardKind::Referral { .. } => "referral_reward",
            RewardKind::GameHighScore { .. } => "game_reward",
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardKind::Mission { mission_id } => write!(f, "mission {}", mission_id),
            RewardKind::Quest { quest_id } => write!(f, "quest {}", quest_id),
            RewardKind::Trivia { kind, correct, total } => {
                write!(f, "{:?} trivia {}/{}", kind, correct, total)
            }
            RewardKind::Wallet { kind } => write!(f, "{:?} wallet", kind),
            RewardKind::Social { platform } => write!(f, "{} connection", platform.as_str()),
            RewardKind::Referral { role } => write!(f, "referral ({:?})", role),
            RewardKind::GameHighScore { game_id } => write!(f, "game {} high score", game_id),
        }
    }
}

/// Amount lookup for every [`RewardKind`]
#[derive(Debug, Clone, Default)]
pub struct RewardCatalog {
    rates: RewardRates,
}

impl RewardCatalog {
    pub fn new(rates: RewardRates) -> Self {
        Self { rates }
    }

    /// Amount `kind` is worth right now.
    ///
    /// Definition-backed kinds fail with `NotFound` when the row is gone.
    pub fn amount_for(&self, conn: &Connection, kind: &RewardKind) -> Result<i64, LedgerError> {
        let r = &self.rates;
        let amount = match *kind {
            RewardKind::Mission { mission_id } => definitions::get_mission(conn, mission_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("mission {}", mission_id)))?
                .reward,
            RewardKind::Quest { quest_id } => definitions::get_quest(conn, quest_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("quest {}", quest_id)))?
                .reward,
            RewardKind::GameHighScore { game_id } => definitions::get_game(conn, game_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("game {}", game_id)))?
                .reward,
            RewardKind::Trivia { kind, correct, total } => {
                if correct > total {
                    return Err(LedgerError::InvalidInput(format!(
                        "{} correct answers out of {} questions",
                        correct, total
                    )));
                }
                let per_answer = match kind {
                    TriviaKind::Daily => r.daily_trivia,
                    TriviaKind::Weekly => r.weekly_trivia,
                };
                let bonus = if total > 0 && correct == total { r.perfect_score } else { 0 };
                per_answer
                    .checked_mul(correct as i64)
                    .and_then(|base| base.checked_add(bonus))
                    .ok_or_else(|| LedgerError::InvalidInput("trivia reward overflows".into()))?
            }
            RewardKind::Wallet { kind } => match kind {
                WalletKind::First => r.first_wallet,
                WalletKind::Second => r.second_wallet,
                WalletKind::CrossChain => r.cross_chain,
            },
            RewardKind::Social { platform } => match platform {
                SocialPlatform::Twitter => r.twitter_follow,
                SocialPlatform::Discord => r.discord_join,
                SocialPlatform::Github => r.github_star,
            },
            RewardKind::Referral { role } => match role {
                ReferralRole::Referrer => r.referral_bonus,
                ReferralRole::Referee => r.referral_bonus / 2,
            },
        };
        Ok(amount)
    }
}

// ============================================================================
// Stock catalog
// ============================================================================

/// Counts of what [`seed_default_catalog`] installed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub missions: usize,
    pub quests: usize,
    pub vaults: usize,
    pub games: usize,
    pub nft_boosters: usize,
    pub marketplace_items: usize,
}

/// Install the stock platform catalog when no definitions exist yet.
///
/// Returns `None` if the catalog already had rows. Quests expire one week
/// after `now`.
pub fn seed_default_catalog(conn: &Connection, now: DateTime<Utc>) -> Result<Option<SeedReport>, LedgerError> {
    if !catalog_is_empty(conn)? {
        return Ok(None);
    }

    let mut report = SeedReport::default();

    for (title, description, reward, icon) in [
        ("Daily Check-in", "Check in to the platform every day", 50, "calendar"),
        ("Share on Twitter", "Share the platform with your followers", 100, "twitter"),
        ("Join Discord", "Join the community Discord server", 75, "discord"),
    ] {
        create_mission(conn, &CreateMissionInput {
            title: title.into(),
            description: description.into(),
            reward,
            icon: Some(icon.into()),
            requirements: None,
            active: true,
        })?;
        report.missions += 1;
    }

    let expires_at = now + Duration::days(7);
    for (title, description, reward, progress_max) in [
        ("Stake 1000 Tokens", "Lock at least 1000 tokens in any vault", 500, 1000),
        ("Refer 3 Friends", "Invite three friends who sign up", 250, 3),
        ("Win 5 Mini-Games", "Win five mini-game rounds", 350, 5),
        ("Mint a Booster NFT", "Mint any booster NFT", 400, 1),
    ] {
        create_quest(conn, &CreateQuestInput {
            title: title.into(),
            description: description.into(),
            reward,
            icon: None,
            requirements: None,
            progress_max,
            active: true,
            expires_at,
        })?;
        report.quests += 1;
    }

    let vaults = [
        ("Basic Vault", "Flexible staking for everyone", 1800, 100, None),
        (
            "Enhanced Vault",
            "Higher yield for booster holders",
            2500,
            500,
            Some(json!({ "nft": true, "level": "any" })),
        ),
        (
            "Premium Vault",
            "Top yield for legendary holders with partner tokens",
            4000,
            1000,
            Some(json!({ "nft": true, "level": "legendary", "partnerTokens": true, "amount": 500 })),
        ),
    ];
    for (name, description, apr_bps, min_stake, requirements) in vaults {
        create_vault(conn, &CreateVaultInput {
            name: name.into(),
            description: description.into(),
            apr_bps,
            min_stake,
            requirements,
        })?;
        report.vaults += 1;
    }

    for (title, description, reward) in [
        ("Slerf Runner", "Endless runner", 25),
        ("Slerf Puzzle", "Match-three puzzle", 40),
        ("Crypto Trivia", "Test your crypto knowledge", 30),
    ] {
        create_game(conn, &CreateGameInput {
            title: title.into(),
            description: description.into(),
            reward,
            active: true,
        })?;
        report.games += 1;
    }

    for (name, boost, rarity, price) in [
        ("Rookie Booster", 5, "Common", 5_000),
        ("Veteran Booster", 10, "Uncommon", 15_000),
        ("Master Booster", 15, "Rare", 35_000),
        ("Legend Booster", 25, "Legendary", 75_000),
    ] {
        create_nft_booster(conn, &CreateNftBoosterInput {
            name: name.into(),
            description: format!("+{}% reward boost", boost),
            boost,
            rarity: rarity.into(),
            price,
        })?;
        report.nft_boosters += 1;
    }

    for (name, item_type, price) in [
        ("Slerf T-Shirt", "Merchandise", 5_000),
        ("VIP Pass", "Access Pass", 15_000),
        ("Profile Frame", "Digital Item", 2_500),
        ("Wallpaper Pack", "Digital Item", 1_000),
    ] {
        create_marketplace_item(conn, &CreateMarketplaceItemInput {
            name: name.into(),
            description: String::new(),
            item_type: item_type.into(),
            price,
            available: true,
        })?;
        report.marketplace_items += 1;
    }

    info!(
        missions = report.missions,
        quests = report.quests,
        vaults = report.vaults,
        games = report.games,
        "Seeded default catalog"
    );
    Ok(Some(report))
}
