//! External collaborator interfaces.
//!
//! The engine moves funds, fetches prices, persists history and publishes
//! events exclusively through these traits; no business logic lives behind
//! them. Reference in-memory implementations are in [`crate::adapters`].

use crate::errors::EngineResult;
use crate::round::{Bet, Currency, Round};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Custody of player funds. Every call is atomic; a debit must never drive a
/// balance negative.
#[async_trait]
pub trait WalletPort: Send + Sync {
    async fn balance(&self, player_id: &str, currency: Currency) -> EngineResult<f64>;

    /// Withdraw `amount` from the player. Fails with `InsufficientBalance`
    /// rather than going negative.
    async fn debit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()>;

    async fn credit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()>;
}

/// Market data. Staleness on the order of seconds is acceptable; the engine
/// never requires sub-second freshness.
#[async_trait]
pub trait PricePort: Send + Sync {
    async fn usd_price(&self, currency: Currency) -> EngineResult<f64>;
}

/// Durable history. Failures are logged and retried; they never block the
/// live tick loop.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn save_round(&self, round: &Round) -> EngineResult<()>;
    async fn save_bet(&self, round_id: &str, bet: &Bet) -> EngineResult<()>;
    async fn record_transaction(&self, entry: &TransactionEntry) -> EngineResult<()>;
    /// Highest round number ever persisted, 0 if none. Round numbering
    /// continues monotonically from here across restarts.
    async fn last_round_number(&self) -> EngineResult<u64>;
}

/// Fire-and-forget event publication to observers (websocket fan-out, logs).
/// Implementations must not block the caller.
pub trait BroadcastPort: Send + Sync {
    fn publish(&self, event: GameEvent);
}

/// Ledger entry for a single wallet movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub transaction_id: String,
    pub player_id: String,
    pub kind: TransactionKind,
    pub currency: Currency,
    /// Signed crypto amount: negative for bets, positive for payouts.
    pub amount_crypto: f64,
    pub amount_usd: f64,
    pub price: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub round_id: String,
    pub cashout_multiplier: Option<f64>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Bet,
    Cashout,
}

/// Events observers receive. Within one round, `MultiplierTick` values are
/// monotonically non-decreasing and exactly one `RoundCrashed` is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    RoundStarted {
        round_id: String,
        round_number: u64,
        hash: String,
        prices: BTreeMap<Currency, f64>,
        timestamp_ms: i64,
    },
    MultiplierTick {
        multiplier: f64,
        timestamp_ms: i64,
    },
    BetPlaced {
        round_id: String,
        player_id: String,
        currency: Currency,
        amount_usd: f64,
        amount_crypto: f64,
        timestamp_ms: i64,
    },
    PlayerCashedOut {
        round_id: String,
        player_id: String,
        currency: Currency,
        multiplier: f64,
        payout_crypto: f64,
        payout_usd: f64,
        timestamp_ms: i64,
    },
    RoundCrashed {
        round_id: String,
        crash_point: f64,
        timestamp_ms: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = GameEvent::RoundCrashed {
            round_id: "round_5".to_string(),
            crash_point: 2.13,
            timestamp_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"event\":\"round_crashed\""));
        assert!(json.contains("round_5"));

        let back: GameEvent = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(back, GameEvent::RoundCrashed { crash_point, .. } if crash_point == 2.13));
    }

    #[test]
    fn test_transaction_entry_serialization() {
        let entry = TransactionEntry {
            transaction_id: "tx-1".to_string(),
            player_id: "alice".to_string(),
            kind: TransactionKind::Bet,
            currency: Currency::Btc,
            amount_crypto: -0.0001,
            amount_usd: 6.0,
            price: 60_000.0,
            balance_before: 1.0,
            balance_after: 0.9999,
            round_id: "round_1".to_string(),
            cashout_multiplier: None,
            timestamp_ms: 0,
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        assert!(json.contains("\"kind\":\"bet\""));
        assert!(json.contains("\"currency\":\"BTC\""));
    }
}
