//! Acquisition Gate - NFT mints and marketplace purchases
//!
//! Price lookup, conditional debit and the acquisition record share one
//! transaction. The debit itself is a single `UPDATE ... WHERE balance >= ?`,
//! so two purchases racing for the same last tokens cannot both pass.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::acquisitions::{self, AcquisitionKind, AcquisitionRecord};
use crate::db::{definitions, JournalEntry, LedgerDb, MarketplaceItemRow, NftBoosterRow};
use crate::error::{LedgerError, LedgerResult};

use super::balance::debit_in;
use super::events::{EventBus, LedgerEvent};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedNft {
    #[serde(flatten)]
    pub record: AcquisitionRecord,
    pub booster: NftBoosterRow,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedItem {
    #[serde(flatten)]
    pub record: AcquisitionRecord,
    pub item: MarketplaceItemRow,
}

pub struct AcquisitionGate {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl AcquisitionGate {
    pub fn new(db: Arc<LedgerDb>, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self { db, clock, events }
    }

    /// Buy `definition_id` at its catalog price
    pub fn acquire(&self, user_id: i64, kind: AcquisitionKind, definition_id: i64) -> LedgerResult<AcquisitionRecord> {
        let now = self.clock.now();

        let record = self
            .db
            .transaction(|tx| {
                let price = match kind {
                    AcquisitionKind::NftMint => {
                        definitions::get_nft_booster(tx, definition_id)?
                            .ok_or_else(|| LedgerError::NotFound(format!("NFT booster {}", definition_id)))?
                            .price
                    }
                    AcquisitionKind::MarketplacePurchase => {
                        let item = definitions::get_marketplace_item(tx, definition_id)?
                            .ok_or_else(|| LedgerError::NotFound(format!("marketplace item {}", definition_id)))?;
                        if !item.available {
                            return Err(LedgerError::Unavailable(format!("{} is not for sale", item.name)));
                        }
                        item.price
                    }
                };

                let entry = JournalEntry::new(kind.as_str())
                    .with_metadata(json!({ "definitionId": definition_id }));
                debit_in(tx, user_id, price, &entry, now)?;
                acquisitions::insert_acquisition(tx, kind, user_id, definition_id, price, now)
            })
            .map_err(|e| {
                debug!(user_id, kind = kind.as_str(), definition_id, error = %e, "Acquisition rejected");
                e
            })?;

        info!(user_id, kind = kind.as_str(), definition_id, price = record.price_paid, "Acquired");
        self.events.emit(LedgerEvent::Acquired {
            user_id,
            kind,
            definition_id,
            price: record.price_paid,
        });
        Ok(record)
    }

    pub fn mint_nft(&self, user_id: i64, nft_id: i64) -> LedgerResult<AcquisitionRecord> {
        self.acquire(user_id, AcquisitionKind::NftMint, nft_id)
    }

    pub fn purchase_item(&self, user_id: i64, item_id: i64) -> LedgerResult<AcquisitionRecord> {
        self.acquire(user_id, AcquisitionKind::MarketplacePurchase, item_id)
    }

    pub fn user_nfts(&self, user_id: i64) -> LedgerResult<Vec<OwnedNft>> {
        self.db.with_conn(|conn| {
            let mut owned = Vec::new();
            for record in acquisitions::list_user_acquisitions(conn, AcquisitionKind::NftMint, user_id)? {
                if let Some(booster) = definitions::get_nft_booster(conn, record.definition_id)? {
                    owned.push(OwnedNft { record, booster });
                }
            }
            Ok(owned)
        })
    }

    pub fn user_purchases(&self, user_id: i64) -> LedgerResult<Vec<OwnedItem>> {
        self.db.with_conn(|conn| {
            let mut owned = Vec::new();
            for record in acquisitions::list_user_acquisitions(conn, AcquisitionKind::MarketplacePurchase, user_id)? {
                if let Some(item) = definitions::get_marketplace_item(conn, record.definition_id)? {
                    owned.push(OwnedItem { record, item });
                }
            }
            Ok(owned)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::definitions::{CreateMarketplaceItemInput, CreateNftBoosterInput};
    use crate::services::test_support::*;
    use crate::services::Ledger;

    fn booster(ledger: &Ledger, price: i64) -> i64 {
        ledger
            .catalog
            .create_nft_booster(CreateNftBoosterInput {
                name: "Rookie Booster".into(),
                description: String::new(),
                boost: 5,
                rarity: "Common".into(),
                price,
            })
            .unwrap()
            .id
    }

    fn item(ledger: &Ledger, price: i64, available: bool) -> i64 {
        ledger
            .catalog
            .create_marketplace_item(CreateMarketplaceItemInput {
                name: "VIP Pass".into(),
                description: String::new(),
                item_type: "Access Pass".into(),
                price,
                available,
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_mint_debits_and_records() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 6_000);
        let nft_id = booster(&ledger, 5_000);

        let record = ledger.acquisitions.mint_nft(alice.id, nft_id).unwrap();
        assert_eq!(record.price_paid, 5_000);
        assert_eq!(record.acquired_at, start());
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 1_000);

        let owned = ledger.acquisitions.user_nfts(alice.id).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].booster.rarity, "Common");
    }

    #[test]
    fn test_failures_leave_no_trace() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 100);
        let pricey = item(&ledger, 1_000, true);
        let retired = item(&ledger, 10, false);

        assert!(matches!(
            ledger.acquisitions.purchase_item(alice.id, pricey),
            Err(LedgerError::InsufficientBalance { required: 1_000, available: 100 })
        ));
        assert!(matches!(
            ledger.acquisitions.purchase_item(alice.id, retired),
            Err(LedgerError::Unavailable(_))
        ));
        assert!(matches!(
            ledger.acquisitions.purchase_item(alice.id, 4242),
            Err(LedgerError::NotFound(_))
        ));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 100);
        assert!(ledger.acquisitions.user_purchases(alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_acquires_for_exact_balance() {
        let (ledger, _clock, _dir) = ledger();
        let ledger = Arc::new(ledger);
        let alice = user(&ledger, "alice", 5_000);
        let nft_id = booster(&ledger, 5_000);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.acquisitions.mint_nft(alice.id, nft_id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LedgerError::InsufficientBalance { required: 5_000, available: 0 })
        )));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 0);
        assert_eq!(ledger.acquisitions.user_nfts(alice.id).unwrap().len(), 1);
    }
}
