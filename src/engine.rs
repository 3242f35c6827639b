//! The engine: one logically active round behind one arbitration point.
//!
//! All mutations of the current round's ledger and lifecycle state go through
//! `current`, a single async mutex. The tick's crash check, bet commits and
//! cash-out commits are all decided under that lock, so a cash-out racing a
//! crash resolves deterministically: whichever acquires the lock first wins,
//! and the loser observes the already-applied transition.
//!
//! Wallet and persistence calls never run under the lock. Bets reserve their
//! slot under the lock, debit outside it, then commit under the lock again
//! (with a refund if the round crashed in between); cash-outs commit under the
//! lock first, because the commit *is* the arbitration, and roll back only if
//! the subsequent credit fails.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{FairnessGenerator, FairnessProof};
use crate::multiplier::multiplier_after;
use crate::ports::{
    BroadcastPort, GameEvent, PersistencePort, PricePort, TransactionEntry, TransactionKind,
    WalletPort,
};
use crate::round::{Bet, Currency, Round, RoundState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of a single tick, reported to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Round still active; the published multiplier.
    Running { multiplier: f64 },
    /// This tick crossed the crash point and performed the transition.
    Crashed { round_id: String, crash_point: f64 },
    /// No active round (between rounds, or already crashed).
    Idle,
}

/// Read-only view of the engine for observers and transports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    pub state: RoundState,
    pub round_id: Option<String>,
    pub round_number: Option<u64>,
    pub hash: Option<String>,
    pub multiplier: f64,
    pub prices: BTreeMap<Currency, f64>,
    pub started_at_ms: Option<i64>,
}

pub struct CrashEngine {
    config: EngineConfig,
    fairness: FairnessGenerator,
    wallet: Arc<dyn WalletPort>,
    prices: Arc<dyn PricePort>,
    store: Arc<dyn PersistencePort>,
    broadcast: Arc<dyn BroadcastPort>,
    /// The single arbitration point for the current round.
    current: Mutex<Option<Round>>,
    /// Next round number to create.
    next_round: AtomicU64,
    shutting_down: AtomicBool,
}

impl CrashEngine {
    pub fn new(
        config: EngineConfig,
        wallet: Arc<dyn WalletPort>,
        prices: Arc<dyn PricePort>,
        store: Arc<dyn PersistencePort>,
        broadcast: Arc<dyn BroadcastPort>,
    ) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let fairness = FairnessGenerator::new(config.fairness.clone())?;
        Ok(Self {
            config,
            fairness,
            wallet,
            prices,
            store,
            broadcast,
            current: Mutex::new(None),
            next_round: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Continue round numbering from persisted history. Called once before
    /// the first round.
    pub async fn sync_round_counter(&self) -> EngineResult<()> {
        let last = self.store.last_round_number().await?;
        self.next_round.store(last + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Create, publish and activate the next round.
    ///
    /// Fairness failures are fatal for the attempt (never fall back to an
    /// unverifiable crash point); price failures are retryable. Initial
    /// persistence is best-effort and does not hold up the round.
    pub async fn begin_round(&self) -> EngineResult<String> {
        self.begin_round_with_seed(None).await
    }

    /// Like [`begin_round`](Self::begin_round) with a caller-supplied seed,
    /// for reproducing a specific round (operator tooling, tests). The seed
    /// must be a 64-char hex string or creation aborts.
    pub async fn begin_round_with_seed(&self, seed: Option<String>) -> EngineResult<String> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let round_number = self.next_round.load(Ordering::SeqCst);
        let spec = self.fairness.round_spec(round_number, seed)?;

        let mut prices = BTreeMap::new();
        for currency in Currency::all() {
            prices.insert(currency, self.prices.usd_price(currency).await?);
        }

        let now_ms = now_ms();
        let mut round = Round::new(spec, prices.clone(), now_ms);
        round.activate();
        let round_id = round.id.clone();
        let hash = round.hash.clone();
        let crash_point = round.crash_point;

        {
            let mut current = self.current.lock().await;
            if let Some(old) = current.as_ref() {
                // A predecessor that never settled would be silently lost.
                if old.state != RoundState::Settled {
                    warn!(round_id = %old.id, state = ?old.state, "replacing unsettled round");
                }
            }
            *current = Some(round.clone());
        }
        self.next_round.store(round_number + 1, Ordering::SeqCst);

        self.spawn_round_persist(round);
        self.broadcast.publish(GameEvent::RoundStarted {
            round_id: round_id.clone(),
            round_number,
            hash,
            prices,
            timestamp_ms: now_ms,
        });
        info!(%round_id, crash_point, "round started");
        Ok(round_id)
    }

    /// One tick: recompute the live multiplier and crash if it reached the
    /// crash point. The check and the transition happen under the round lock,
    /// atomically with respect to in-flight cash-outs.
    pub async fn tick(&self) -> TickOutcome {
        let mut current = self.current.lock().await;
        let Some(round) = current.as_mut() else {
            return TickOutcome::Idle;
        };
        if !round.is_active() {
            return TickOutcome::Idle;
        }

        let now = now_ms();
        // Monotonic elapsed: a stepped wall clock cannot lower a published
        // multiplier or undercut the crash check.
        let multiplier = multiplier_after(round.elapsed_ms(), self.config.multiplier.growth_factor);

        if multiplier >= round.crash_point {
            let round_id = round.id.clone();
            let crash_point = round.crash_point;
            round.crash(now);
            // Published under the lock: exactly one RoundCrashed per round,
            // ordered after every tick and cash-out that beat it.
            self.broadcast.publish(GameEvent::RoundCrashed {
                round_id: round_id.clone(),
                crash_point,
                timestamp_ms: now,
            });
            info!(%round_id, crash_point, "round crashed");
            return TickOutcome::Crashed {
                round_id,
                crash_point,
            };
        }

        self.broadcast.publish(GameEvent::MultiplierTick {
            multiplier,
            timestamp_ms: now,
        });
        TickOutcome::Running { multiplier }
    }

    /// Force a crash regardless of the multiplier: the round deadline's
    /// liveness safeguard and the shutdown path. Returns false if no active
    /// round (the crash already happened).
    pub async fn crash_current(&self) -> bool {
        let mut current = self.current.lock().await;
        let Some(round) = current.as_mut() else {
            return false;
        };
        let now = now_ms();
        if !round.crash(now) {
            return false;
        }
        let round_id = round.id.clone();
        let crash_point = round.crash_point;
        self.broadcast.publish(GameEvent::RoundCrashed {
            round_id: round_id.clone(),
            crash_point,
            timestamp_ms: now,
        });
        info!(%round_id, crash_point, "round force-crashed");
        true
    }

    /// Apply a crashed round's persistence side effects, then mark it
    /// settled. Retries within the configured budget; after that the failure
    /// is reported and the round is settled anyway so gameplay can continue.
    pub async fn settle_current(&self) {
        let snapshot = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(r) if r.state == RoundState::Crashed => Some(r.clone()),
                _ => None,
            }
        };
        let Some(round) = snapshot else {
            return;
        };

        let mut attempt = 0u32;
        let persisted = loop {
            attempt += 1;
            match self.persist_settlement(&round).await {
                Ok(()) => break true,
                Err(e) if attempt < self.config.round.settle_max_attempts => {
                    warn!(round_id = %round.id, attempt, "settlement persistence failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.round.retry_backoff_ms.min(500) * attempt as u64,
                    ))
                    .await;
                }
                Err(e) => {
                    error!(round_id = %round.id, "settlement persistence abandoned after {attempt} attempts: {e}");
                    break false;
                }
            }
        };

        let mut current = self.current.lock().await;
        if let Some(r) = current.as_mut() {
            if r.id == round.id && r.state == RoundState::Crashed {
                r.mark_settled();
                info!(
                    round_id = %r.id,
                    persisted,
                    seed = r.revealed_seed().unwrap_or_default(),
                    "round settled, seed revealed"
                );
            }
        }
    }

    async fn persist_settlement(&self, round: &Round) -> EngineResult<()> {
        self.store.save_round(round).await?;
        for bet in round.bets() {
            self.store.save_bet(&round.id, bet).await?;
        }
        Ok(())
    }

    /// Place a bet in the current round.
    pub async fn place_bet(
        &self,
        player_id: &str,
        amount_usd: f64,
        currency_code: &str,
    ) -> EngineResult<Bet> {
        let currency = Currency::parse(currency_code)?;
        let bounds = &self.config.betting;
        if !amount_usd.is_finite()
            || amount_usd < bounds.min_bet_usd
            || amount_usd > bounds.max_bet_usd
        {
            return Err(EngineError::BetOutOfBounds {
                amount_usd,
                min_usd: bounds.min_bet_usd,
                max_usd: bounds.max_bet_usd,
            });
        }

        let price = self.price_of(currency).await?;
        let amount_crypto = amount_usd / price;

        // Reserve the player's slot under the lock so a concurrent duplicate
        // fails immediately, then run the debit without holding the lock. The
        // reservation is pinned to this round's id: it must never carry over
        // into a successor round.
        let reserved_round_id = {
            let mut current = self.current.lock().await;
            let round = current.as_mut().ok_or(EngineError::NoActiveRound)?;
            round.reserve_bet(player_id)?;
            round.id.clone()
        };

        let balance_before = match self.wallet.balance(player_id, currency).await {
            Ok(b) => b,
            Err(e) => {
                self.release_reservation(&reserved_round_id, player_id).await;
                return Err(e);
            }
        };
        if let Err(e) = self.wallet.debit(player_id, currency, amount_crypto).await {
            self.release_reservation(&reserved_round_id, player_id).await;
            return Err(e);
        }

        // Commit into the round the reservation was taken in, and only that
        // round. If it crashed (or was replaced) while the debit was in
        // flight, the commit fails and the stake is refunded: debit and
        // bet-append are atomic as a pair.
        let now = now_ms();
        let commit = {
            let mut current = self.current.lock().await;
            match current.as_mut() {
                Some(round) if round.id == reserved_round_id => {
                    round.commit_bet(player_id, currency, amount_usd, amount_crypto, price, now)
                }
                Some(_) | None => Err(EngineError::NoActiveRound),
            }
        };
        let bet = match commit {
            Ok(bet) => bet,
            Err(e) => {
                if let Err(refund_err) =
                    self.wallet.credit(player_id, currency, amount_crypto).await
                {
                    error!(
                        player_id,
                        %currency,
                        amount_crypto,
                        "refund after failed bet commit also failed: {refund_err}"
                    );
                }
                return Err(e);
            }
        };

        let round_id = self.current_round_id().await.unwrap_or_default();
        self.broadcast.publish(GameEvent::BetPlaced {
            round_id: round_id.clone(),
            player_id: player_id.to_string(),
            currency,
            amount_usd,
            amount_crypto,
            timestamp_ms: now,
        });
        self.spawn_transaction_persist(TransactionEntry {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            player_id: player_id.to_string(),
            kind: TransactionKind::Bet,
            currency,
            amount_crypto: -amount_crypto,
            amount_usd,
            price,
            balance_before,
            balance_after: balance_before - amount_crypto,
            round_id,
            cashout_multiplier: None,
            timestamp_ms: now,
        });
        Ok(bet)
    }

    /// Cash the player's open bet out at the live multiplier.
    ///
    /// The commit happens under the round lock together with the crash
    /// check: a cash-out racing the crash transition is honored iff it takes
    /// the lock while the round is still active and the live multiplier is
    /// strictly below the crash point.
    pub async fn cash_out(&self, player_id: &str) -> EngineResult<Bet> {
        // Validate and learn the bet's currency; no state change yet.
        let currency = {
            let current = self.current.lock().await;
            let round = current.as_ref().ok_or(EngineError::NoActiveRound)?;
            if !round.is_active() {
                return Err(EngineError::RoundAlreadyCrashed {
                    round_id: round.id.clone(),
                    crash_point: round.crash_point,
                });
            }
            match round.open_bet(player_id) {
                Some(bet) => bet.currency,
                None => {
                    return Err(match round.bet_for(player_id) {
                        Some(_) => EngineError::AlreadyCashedOut(player_id.to_string()),
                        None => EngineError::NoOpenBet(player_id.to_string()),
                    })
                }
            }
        };

        let price = self.price_of(currency).await?;

        // Commit under the lock; this is the deterministic arbitration point.
        let now = now_ms();
        let (bet, round_id) = {
            let mut current = self.current.lock().await;
            let round = current.as_mut().ok_or(EngineError::NoActiveRound)?;
            let live = multiplier_after(round.elapsed_ms(), self.config.multiplier.growth_factor);
            let bet = round.cash_out_bet(player_id, live, price, now)?;
            (bet, round.id.clone())
        };

        if let Err(e) = self
            .wallet
            .credit(player_id, currency, bet.payout_crypto)
            .await
        {
            // Roll the decision back while the round is still active; once it
            // crashed the ledger is frozen and the failure needs operator
            // attention instead of a silent void.
            let mut current = self.current.lock().await;
            let reverted = current
                .as_mut()
                .map(|r| r.revert_cash_out(player_id))
                .unwrap_or(false);
            if !reverted {
                error!(
                    player_id,
                    round_id,
                    payout = bet.payout_crypto,
                    "payout credit failed after round froze; manual settlement required: {e}"
                );
            }
            return Err(e);
        }

        let multiplier = bet.cashout_multiplier.unwrap_or_default();
        self.broadcast.publish(GameEvent::PlayerCashedOut {
            round_id: round_id.clone(),
            player_id: player_id.to_string(),
            currency,
            multiplier,
            payout_crypto: bet.payout_crypto,
            payout_usd: bet.payout_usd,
            timestamp_ms: now,
        });
        let balance_after = self
            .wallet
            .balance(player_id, currency)
            .await
            .unwrap_or_default();
        self.spawn_transaction_persist(TransactionEntry {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            player_id: player_id.to_string(),
            kind: TransactionKind::Cashout,
            currency,
            amount_crypto: bet.payout_crypto,
            amount_usd: bet.payout_usd,
            price,
            balance_before: balance_after - bet.payout_crypto,
            balance_after,
            round_id,
            cashout_multiplier: bet.cashout_multiplier,
            timestamp_ms: now,
        });
        info!(player_id, multiplier, payout = bet.payout_crypto, "player cashed out");
        Ok(bet)
    }

    /// Observer view of the current round.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(round) => {
                let multiplier = if round.is_active() {
                    multiplier_after(round.elapsed_ms(), self.config.multiplier.growth_factor)
                } else {
                    round.final_multiplier
                };
                EngineSnapshot {
                    state: round.state,
                    round_id: Some(round.id.clone()),
                    round_number: Some(round.number),
                    hash: Some(round.hash.clone()),
                    multiplier,
                    prices: round.prices.clone(),
                    started_at_ms: Some(round.started_at_ms),
                }
            }
            None => EngineSnapshot {
                state: RoundState::Pending,
                round_id: None,
                round_number: None,
                hash: None,
                multiplier: 1.0,
                prices: BTreeMap::new(),
                started_at_ms: None,
            },
        }
    }

    /// Verification surface: the revealed proof for the current round once it
    /// has crashed, `None` while the seed is still secret.
    pub async fn current_proof(&self) -> Option<FairnessProof> {
        let current = self.current.lock().await;
        let round = current.as_ref()?;
        round
            .revealed_seed()
            .map(|seed| self.fairness.proof(seed, round.number))
    }

    pub fn fairness(&self) -> &FairnessGenerator {
        &self.fairness
    }

    /// Stop accepting new rounds; force-end and settle the in-flight one.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if self.crash_current().await {
            self.settle_current().await;
        }
        info!("engine shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn price_of(&self, currency: Currency) -> EngineResult<f64> {
        let price = self.prices.usd_price(currency).await?;
        if !(price.is_finite() && price > 0.0) {
            return Err(EngineError::PriceUnavailable(
                currency,
                format!("non-positive price {price}"),
            ));
        }
        Ok(price)
    }

    async fn release_reservation(&self, round_id: &str, player_id: &str) {
        let mut current = self.current.lock().await;
        if let Some(round) = current.as_mut() {
            // Only the round that holds this reservation; a successor round's
            // reservations belong to other in-flight requests.
            if round.id == round_id {
                round.release_reservation(player_id);
            }
        }
    }

    async fn current_round_id(&self) -> Option<String> {
        let current = self.current.lock().await;
        current.as_ref().map(|r| r.id.clone())
    }

    /// Best-effort initial persistence of a freshly created round.
    fn spawn_round_persist(&self, round: Round) {
        let store = self.store.clone();
        tokio::spawn(async move {
            for attempt in 1..=3u32 {
                match store.save_round(&round).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(round_id = %round.id, attempt, "round persistence failed: {e}");
                        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
            error!(round_id = %round.id, "round persistence abandoned");
        });
    }

    /// Best-effort transaction history write, off the request path.
    fn spawn_transaction_persist(&self, entry: TransactionEntry) {
        let store = self.store.clone();
        tokio::spawn(async move {
            for attempt in 1..=3u32 {
                match store.record_transaction(&entry).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(
                            transaction_id = %entry.transaction_id,
                            attempt,
                            "transaction persistence failed: {e}"
                        );
                        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
            error!(transaction_id = %entry.transaction_id, "transaction persistence abandoned");
        });
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
