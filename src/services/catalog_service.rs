//! Catalog service - definition administration and reward lookups

use std::sync::Arc;

use tracing::info;

use crate::catalog::{seed_default_catalog, RewardCatalog, RewardKind, SeedReport};
use crate::clock::Clock;
use crate::db::definitions::{self, *};
use crate::db::LedgerDb;
use crate::error::{LedgerError, LedgerResult};

pub struct CatalogService {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    catalog: Arc<RewardCatalog>,
}

impl CatalogService {
    pub fn new(db: Arc<LedgerDb>, clock: Arc<dyn Clock>, catalog: Arc<RewardCatalog>) -> Self {
        Self { db, clock, catalog }
    }

    /// What `kind` would pay right now
    pub fn reward_amount(&self, kind: &RewardKind) -> LedgerResult<i64> {
        self.db.with_conn(|conn| self.catalog.amount_for(conn, kind))
    }

    /// Install the stock catalog into an empty database
    pub fn seed_default(&self) -> LedgerResult<Option<SeedReport>> {
        let now = self.clock.now();
        self.db.transaction(|tx| seed_default_catalog(tx, now))
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn missions(&self) -> LedgerResult<Vec<MissionRow>> {
        self.db.with_conn(definitions::list_missions)
    }

    /// Active quests that have not expired yet
    pub fn open_quests(&self) -> LedgerResult<Vec<QuestRow>> {
        let now = self.clock.now();
        self.db.with_conn(|conn| definitions::list_open_quests(conn, now))
    }

    pub fn games(&self) -> LedgerResult<Vec<GameRow>> {
        self.db.with_conn(definitions::list_games)
    }

    pub fn vaults(&self) -> LedgerResult<Vec<VaultRow>> {
        self.db.with_conn(definitions::list_vaults)
    }

    pub fn vault(&self, id: i64) -> LedgerResult<VaultRow> {
        self.db
            .with_conn(|conn| definitions::get_vault(conn, id))?
            .ok_or(LedgerError::VaultNotFound(id))
    }

    pub fn nft_boosters(&self) -> LedgerResult<Vec<NftBoosterRow>> {
        self.db.with_conn(definitions::list_nft_boosters)
    }

    /// Items currently for sale
    pub fn marketplace_items(&self) -> LedgerResult<Vec<MarketplaceItemRow>> {
        self.db.with_conn(definitions::list_marketplace_items)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create_mission(&self, input: CreateMissionInput) -> LedgerResult<MissionRow> {
        require_name("title", &input.title)?;
        let mission = self.db.with_conn(|conn| definitions::create_mission(conn, &input))?;
        info!(mission_id = mission.id, reward = mission.reward, "Mission created");
        Ok(mission)
    }

    pub fn create_quest(&self, input: CreateQuestInput) -> LedgerResult<QuestRow> {
        require_name("title", &input.title)?;
        let quest = self.db.with_conn(|conn| definitions::create_quest(conn, &input))?;
        info!(quest_id = quest.id, reward = quest.reward, expires_at = %quest.expires_at, "Quest created");
        Ok(quest)
    }

    pub fn create_game(&self, input: CreateGameInput) -> LedgerResult<GameRow> {
        require_name("title", &input.title)?;
        self.db.with_conn(|conn| definitions::create_game(conn, &input))
    }

    pub fn create_vault(&self, input: CreateVaultInput) -> LedgerResult<VaultRow> {
        require_name("name", &input.name)?;
        let vault = self.db.with_conn(|conn| definitions::create_vault(conn, &input))?;
        info!(vault_id = vault.id, apr_bps = vault.apr_bps, min_stake = vault.min_stake, "Vault created");
        Ok(vault)
    }

    pub fn create_nft_booster(&self, input: CreateNftBoosterInput) -> LedgerResult<NftBoosterRow> {
        require_name("name", &input.name)?;
        self.db.with_conn(|conn| definitions::create_nft_booster(conn, &input))
    }

    pub fn create_marketplace_item(&self, input: CreateMarketplaceItemInput) -> LedgerResult<MarketplaceItemRow> {
        require_name("name", &input.name)?;
        self.db.with_conn(|conn| definitions::create_marketplace_item(conn, &input))
    }

    /// Take an item off sale or put it back
    pub fn set_item_available(&self, item_id: i64, available: bool) -> LedgerResult<()> {
        self.db
            .with_conn(|conn| definitions::set_marketplace_item_available(conn, item_id, available))?;
        info!(item_id, available, "Marketplace item availability changed");
        Ok(())
    }
}

fn require_name(field: &str, value: &str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}
