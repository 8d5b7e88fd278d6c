//! Ledger events
//!
//! Services emit one event per committed state change. Nothing in the
//! ledger depends on delivery: events are emitted only after the
//! transaction commits and a full channel just drops them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::catalog::RewardKind;
use crate::db::AcquisitionKind;

#[derive(Debug, Clone)]
pub enum LedgerEvent {
    UserCreated {
        user_id: i64,
        username: String,
    },
    Credited {
        user_id: i64,
        amount: i64,
        reason: String,
        balance: i64,
    },
    Debited {
        user_id: i64,
        amount: i64,
        reason: String,
        balance: i64,
    },
    RewardGranted {
        user_id: i64,
        kind: RewardKind,
        amount: i64,
    },
    Staked {
        user_id: i64,
        stake_id: i64,
        vault_id: i64,
        amount: i64,
    },
    StakeRewardsClaimed {
        user_id: i64,
        stake_id: i64,
        amount: i64,
    },
    Unstaked {
        user_id: i64,
        stake_id: i64,
        principal: i64,
        rewards: i64,
    },
    Acquired {
        user_id: i64,
        kind: AcquisitionKind,
        definition_id: i64,
        price: i64,
    },
    ReferralRegistered {
        referrer_id: i64,
        referee_id: i64,
    },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LedgerEvent);
}

/// Broadcast bus for ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit trail listener
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::RewardGranted { user_id, kind, amount } => {
                info!(user_id, amount, reward = %kind, "Reward granted");
            }
            LedgerEvent::Staked { user_id, stake_id, vault_id, amount } => {
                info!(user_id, stake_id, vault_id, amount, "Tokens staked");
            }
            LedgerEvent::Unstaked { user_id, stake_id, principal, rewards } => {
                info!(user_id, stake_id, principal, rewards, "Stake closed");
            }
            LedgerEvent::Acquired { user_id, kind, definition_id, price } => {
                info!(user_id, kind = kind.as_str(), definition_id, price, "Acquisition");
            }
            LedgerEvent::Credited { user_id, amount, reason, .. }
            | LedgerEvent::Debited { user_id, amount, reason, .. } => {
                debug!(user_id, amount, reason = %reason, "Balance changed");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs every event
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_subscriber_sees_emitted_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(LedgerEvent::ReferralRegistered { referrer_id: 1, referee_id: 2 });

        let event = timeout(Duration::from_millis(100), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(
            event,
            LedgerEvent::ReferralRegistered { referrer_id: 1, referee_id: 2 }
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::with_capacity(4);
        bus.emit(LedgerEvent::UserCreated { user_id: 1, username: "alice".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
