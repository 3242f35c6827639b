//! In-memory reference implementations of the engine's ports.
//!
//! Used by the demo binary and the test suite. Each adapter honors the same
//! contract a production implementation would: the wallet never goes
//! negative, the store keeps ordered history, the broadcaster never blocks.

use crate::errors::{EngineError, EngineResult};
use crate::ports::{
    BroadcastPort, GameEvent, PersistencePort, PricePort, TransactionEntry, WalletPort,
};
use crate::round::{Bet, Currency, Round};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// DashMap-backed wallet. Debits and credits run under the entry's shard
/// lock, so per-player-per-currency updates are atomic.
#[derive(Default)]
pub struct MemoryWallet {
    balances: DashMap<(String, Currency), f64>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, player_id: &str, currency: Currency, amount: f64) {
        *self
            .balances
            .entry((player_id.to_string(), currency))
            .or_insert(0.0) += amount;
    }
}

#[async_trait]
impl WalletPort for MemoryWallet {
    async fn balance(&self, player_id: &str, currency: Currency) -> EngineResult<f64> {
        Ok(self
            .balances
            .get(&(player_id.to_string(), currency))
            .map(|b| *b)
            .unwrap_or(0.0))
    }

    async fn debit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()> {
        let mut entry = self
            .balances
            .entry((player_id.to_string(), currency))
            .or_insert(0.0);
        if *entry < amount {
            return Err(EngineError::InsufficientBalance {
                player: player_id.to_string(),
                currency,
            });
        }
        *entry -= amount;
        Ok(())
    }

    async fn credit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()> {
        *self
            .balances
            .entry((player_id.to_string(), currency))
            .or_insert(0.0) += amount;
        Ok(())
    }
}

/// Fixed price table. Good enough for the engine, which tolerates staleness.
pub struct StaticPrices {
    prices: DashMap<Currency, f64>,
}

impl StaticPrices {
    /// BTC $60k / ETH $3k, the demo defaults.
    pub fn demo() -> Self {
        let prices = DashMap::new();
        prices.insert(Currency::Btc, 60_000.0);
        prices.insert(Currency::Eth, 3_000.0);
        Self { prices }
    }

    pub fn set(&self, currency: Currency, price: f64) {
        self.prices.insert(currency, price);
    }
}

#[async_trait]
impl PricePort for StaticPrices {
    async fn usd_price(&self, currency: Currency) -> EngineResult<f64> {
        self.prices
            .get(&currency)
            .map(|p| *p)
            .ok_or_else(|| EngineError::PriceUnavailable(currency, "no quote".to_string()))
    }
}

/// In-memory history store. `saved rounds` are keyed by id (latest write
/// wins, as a DB upsert would), transactions append in order.
#[derive(Default)]
pub struct MemoryStore {
    rounds: DashMap<String, Round>,
    bets: DashMap<String, Vec<Bet>>,
    transactions: Mutex<Vec<TransactionEntry>>,
    /// Simulates an unavailable database when set.
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn round(&self, round_id: &str) -> Option<Round> {
        self.rounds.get(round_id).map(|r| r.clone())
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn transactions(&self) -> Vec<TransactionEntry> {
        self.transactions.lock().expect("transactions lock").clone()
    }

    fn check_available(&self) -> EngineResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::Persistence("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistencePort for MemoryStore {
    async fn save_round(&self, round: &Round) -> EngineResult<()> {
        self.check_available()?;
        self.rounds.insert(round.id.clone(), round.clone());
        Ok(())
    }

    async fn save_bet(&self, round_id: &str, bet: &Bet) -> EngineResult<()> {
        self.check_available()?;
        let mut bets = self.bets.entry(round_id.to_string()).or_default();
        // Upsert by player: settlement re-saves the final bet state.
        if let Some(existing) = bets.iter_mut().find(|b| b.player_id == bet.player_id) {
            *existing = bet.clone();
        } else {
            bets.push(bet.clone());
        }
        Ok(())
    }

    async fn record_transaction(&self, entry: &TransactionEntry) -> EngineResult<()> {
        self.check_available()?;
        self.transactions
            .lock()
            .expect("transactions lock")
            .push(entry.clone());
        Ok(())
    }

    async fn last_round_number(&self) -> EngineResult<u64> {
        Ok(self
            .rounds
            .iter()
            .map(|r| r.value().number)
            .max()
            .unwrap_or(0))
    }
}

/// Tokio broadcast fan-out. Send errors (no subscribers) are ignored:
/// publication is fire-and-forget by contract.
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<GameEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BroadcastPort for ChannelBroadcaster {
    fn publish(&self, event: GameEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wallet_never_goes_negative() {
        let wallet = MemoryWallet::new();
        wallet.fund("alice", Currency::Btc, 0.5);

        assert!(wallet.debit("alice", Currency::Btc, 0.3).await.is_ok());
        let err = wallet
            .debit("alice", Currency::Btc, 0.3)
            .await
            .expect_err("overdraft");
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        let remaining = wallet.balance("alice", Currency::Btc).await.unwrap();
        assert!((remaining - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_wallet_unknown_player_is_empty() {
        let wallet = MemoryWallet::new();
        assert_eq!(wallet.balance("ghost", Currency::Eth).await.unwrap(), 0.0);
        assert!(wallet.debit("ghost", Currency::Eth, 0.1).await.is_err());
    }

    #[tokio::test]
    async fn test_store_round_numbering() {
        let store = MemoryStore::new();
        assert_eq!(store.last_round_number().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_mode() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let entry_err = store
            .record_transaction(&sample_entry())
            .await
            .expect_err("unavailable");
        assert!(matches!(entry_err, EngineError::Persistence(_)));
        store.set_fail_writes(false);
        assert!(store.record_transaction(&sample_entry()).await.is_ok());
        assert_eq!(store.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcaster_without_subscribers_does_not_panic() {
        let broadcaster = ChannelBroadcaster::default();
        broadcaster.publish(GameEvent::MultiplierTick {
            multiplier: 1.05,
            timestamp_ms: 0,
        });
    }

    fn sample_entry() -> TransactionEntry {
        TransactionEntry {
            transaction_id: "tx".to_string(),
            player_id: "alice".to_string(),
            kind: crate::ports::TransactionKind::Bet,
            currency: Currency::Btc,
            amount_crypto: -0.1,
            amount_usd: 6_000.0,
            price: 60_000.0,
            balance_before: 1.0,
            balance_after: 0.9,
            round_id: "round_1".to_string(),
            cashout_multiplier: None,
            timestamp_ms: 0,
        }
    }
}
