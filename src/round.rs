//! Round and bet data model.
//!
//! A [`Round`] owns its lifecycle state and its bet ledger. All mutating
//! methods here assume the caller holds the engine's round lock; the round
//! itself only enforces the per-round invariants:
//!
//! - one open bet per player per round,
//! - a cash-out multiplier, once set, is immutable and strictly below the
//!   crash point,
//! - no lifecycle transition is reversible, and the crash point, seed and
//!   commitment never change after creation.

use crate::errors::{EngineError, EngineResult};
use crate::fairness::RoundSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;

/// Currencies bets can be denominated in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Eth,
}

impl Currency {
    pub fn all() -> [Currency; 2] {
        [Currency::Btc, Currency::Eth]
    }

    /// Parse a client-supplied currency code.
    pub fn parse(code: &str) -> EngineResult<Self> {
        match code.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            other => Err(EngineError::InvalidCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Btc => write!(f, "BTC"),
            Currency::Eth => write!(f, "ETH"),
        }
    }
}

/// Round lifecycle. Transitions are one-way:
/// `Pending -> Active -> Crashed -> Settled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    /// Constructed but not yet published. Instantaneous in practice.
    Pending,
    Active,
    Crashed,
    Settled,
}

/// A single player's stake in a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub player_id: String,
    pub currency: Currency,
    pub amount_usd: f64,
    pub amount_crypto: f64,
    /// USD price of the currency at placement.
    pub price_at_bet: f64,
    pub cashed_out: bool,
    /// Immutable once set; always `1.0 <= m < crash_point`.
    pub cashout_multiplier: Option<f64>,
    pub payout_crypto: f64,
    pub payout_usd: f64,
    pub placed_at_ms: i64,
    pub cashed_out_at_ms: Option<i64>,
}

impl Bet {
    pub fn is_open(&self) -> bool {
        !self.cashed_out
    }
}

/// One game round: identity, fairness data, ledger, totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub number: u64,
    pub state: RoundState,
    /// Wall-clock start, for event timestamps and persistence only.
    pub started_at_ms: i64,
    /// Monotonic anchor for the live multiplier; a stepped wall clock must
    /// never move the curve backwards.
    #[serde(skip, default = "Instant::now")]
    started_instant: Instant,
    pub ended_at_ms: Option<i64>,
    /// Published before the round; the fairness commitment.
    pub hash: String,
    /// Secret until settlement; revealed for verification afterwards.
    seed: String,
    pub crash_point: f64,
    /// Final multiplier reached; equals `crash_point` once crashed.
    pub final_multiplier: f64,
    /// Prices captured at round start, keyed by currency.
    pub prices: BTreeMap<Currency, f64>,
    bets: Vec<Bet>,
    /// Players with a bet reservation whose wallet debit is still in flight.
    #[serde(skip)]
    reserved: HashSet<String>,
    pub total_wagered_usd: f64,
    pub total_paid_out_usd: f64,
}

impl Round {
    /// Construct a `Pending` round from fairness data and captured prices.
    pub fn new(spec: RoundSpec, prices: BTreeMap<Currency, f64>, started_at_ms: i64) -> Self {
        Self {
            id: format!("round_{}", spec.round_number),
            number: spec.round_number,
            state: RoundState::Pending,
            started_at_ms,
            started_instant: Instant::now(),
            ended_at_ms: None,
            hash: spec.hash,
            seed: spec.seed,
            crash_point: spec.crash_point,
            final_multiplier: 1.0,
            prices,
            bets: Vec::new(),
            reserved: HashSet::new(),
            total_wagered_usd: 0.0,
            total_paid_out_usd: 0.0,
        }
    }

    /// Publish the round: `Pending -> Active`.
    pub fn activate(&mut self) {
        debug_assert_eq!(self.state, RoundState::Pending);
        self.state = RoundState::Active;
    }

    pub fn is_active(&self) -> bool {
        self.state == RoundState::Active
    }

    /// Milliseconds since the round started, from the monotonic clock.
    pub fn elapsed_ms(&self) -> i64 {
        self.started_instant.elapsed().as_millis() as i64
    }

    /// The seed stays private while bets can still be influenced by it.
    pub fn revealed_seed(&self) -> Option<&str> {
        match self.state {
            RoundState::Crashed | RoundState::Settled => Some(&self.seed),
            _ => None,
        }
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn open_bet(&self, player_id: &str) -> Option<&Bet> {
        self.bets
            .iter()
            .find(|b| b.player_id == player_id && b.is_open())
    }

    pub fn bet_for(&self, player_id: &str) -> Option<&Bet> {
        self.bets.iter().find(|b| b.player_id == player_id)
    }

    /// Reserve a bet slot for a player before the wallet debit runs. Fails if
    /// the player already has a bet or an in-flight reservation, so two
    /// concurrent placements can never both pass the duplicate check.
    pub fn reserve_bet(&mut self, player_id: &str) -> EngineResult<()> {
        if !self.is_active() {
            return Err(self.not_active_error());
        }
        if self.bet_for(player_id).is_some() || !self.reserved.insert(player_id.to_string()) {
            return Err(EngineError::DuplicateBet(player_id.to_string()));
        }
        Ok(())
    }

    pub fn release_reservation(&mut self, player_id: &str) {
        self.reserved.remove(player_id);
    }

    /// Commit a reserved bet after a successful wallet debit. Returns the
    /// stored bet. Fails (caller must refund) if the round is no longer
    /// active or the player already has a bet here: a commit whose
    /// reservation was taken in an earlier round must never mint a second
    /// bet in this one.
    pub fn commit_bet(
        &mut self,
        player_id: &str,
        currency: Currency,
        amount_usd: f64,
        amount_crypto: f64,
        price: f64,
        now_ms: i64,
    ) -> EngineResult<Bet> {
        self.reserved.remove(player_id);
        if !self.is_active() {
            return Err(self.not_active_error());
        }
        if self.bet_for(player_id).is_some() {
            return Err(EngineError::DuplicateBet(player_id.to_string()));
        }
        let bet = Bet {
            player_id: player_id.to_string(),
            currency,
            amount_usd,
            amount_crypto,
            price_at_bet: price,
            cashed_out: false,
            cashout_multiplier: None,
            payout_crypto: 0.0,
            payout_usd: 0.0,
            placed_at_ms: now_ms,
            cashed_out_at_ms: None,
        };
        self.bets.push(bet.clone());
        self.total_wagered_usd += amount_usd;
        Ok(bet)
    }

    /// Cash a player out at `multiplier`. The caller (the engine, under its
    /// round lock) supplies the live multiplier; this method is the single
    /// place that decides whether the cash-out beats the crash.
    pub fn cash_out_bet(
        &mut self,
        player_id: &str,
        multiplier: f64,
        price: f64,
        now_ms: i64,
    ) -> EngineResult<Bet> {
        if !self.is_active() {
            return Err(self.not_active_error());
        }
        if multiplier >= self.crash_point {
            return Err(EngineError::RoundAlreadyCrashed {
                round_id: self.id.clone(),
                crash_point: self.crash_point,
            });
        }
        let bet = self
            .bets
            .iter_mut()
            .find(|b| b.player_id == player_id)
            .ok_or_else(|| EngineError::NoOpenBet(player_id.to_string()))?;
        if bet.cashed_out {
            return Err(EngineError::AlreadyCashedOut(player_id.to_string()));
        }

        bet.cashed_out = true;
        bet.cashout_multiplier = Some(multiplier);
        bet.cashed_out_at_ms = Some(now_ms);
        bet.payout_crypto = bet.amount_crypto * multiplier;
        bet.payout_usd = bet.payout_crypto * price;
        let committed = bet.clone();
        self.total_paid_out_usd += committed.payout_usd;
        Ok(committed)
    }

    /// Revert a committed cash-out after a failed wallet credit. Only valid
    /// while the round is still active; a crashed round's ledger is frozen.
    pub fn revert_cash_out(&mut self, player_id: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        if let Some(bet) = self
            .bets
            .iter_mut()
            .find(|b| b.player_id == player_id && b.cashed_out)
        {
            self.total_paid_out_usd -= bet.payout_usd;
            bet.cashed_out = false;
            bet.cashout_multiplier = None;
            bet.cashed_out_at_ms = None;
            bet.payout_crypto = 0.0;
            bet.payout_usd = 0.0;
            return true;
        }
        false
    }

    /// `Active -> Crashed`. Freezes the ledger at the crash point. Returns
    /// false if the round already left `Active` (exactly one crash per round).
    pub fn crash(&mut self, now_ms: i64) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = RoundState::Crashed;
        self.ended_at_ms = Some(now_ms);
        self.final_multiplier = self.crash_point;
        self.reserved.clear();
        true
    }

    /// `Crashed -> Settled`, once side effects are applied (or abandoned).
    pub fn mark_settled(&mut self) {
        debug_assert_eq!(self.state, RoundState::Crashed);
        self.state = RoundState::Settled;
    }

    fn not_active_error(&self) -> EngineError {
        match self.state {
            RoundState::Crashed | RoundState::Settled => EngineError::RoundAlreadyCrashed {
                round_id: self.id.clone(),
                crash_point: self.crash_point,
            },
            _ => EngineError::NoActiveRound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_round(crash_point: f64) -> Round {
        let spec = RoundSpec {
            round_number: 1,
            seed: "ab".repeat(32),
            hash: "cd".repeat(32),
            crash_point,
        };
        let mut prices = BTreeMap::new();
        prices.insert(Currency::Btc, 60_000.0);
        prices.insert(Currency::Eth, 3_000.0);
        let mut round = Round::new(spec, prices, 0);
        round.activate();
        round
    }

    fn place(round: &mut Round, player: &str, usd: f64) -> Bet {
        round.reserve_bet(player).expect("reserve");
        let price = 60_000.0;
        round
            .commit_bet(player, Currency::Btc, usd, usd / price, price, 10)
            .expect("commit")
    }

    #[test]
    fn test_bet_stake_conversion() {
        let mut round = test_round(3.0);
        let bet = place(&mut round, "alice", 10.0);
        assert!((bet.amount_crypto - 0.000_166_67).abs() < 1e-9);
        assert_eq!(round.total_wagered_usd, 10.0);
    }

    #[test]
    fn test_duplicate_bet_rejected() {
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        assert!(matches!(
            round.reserve_bet("alice"),
            Err(EngineError::DuplicateBet(_))
        ));
    }

    #[test]
    fn test_reservation_blocks_concurrent_placement() {
        let mut round = test_round(3.0);
        round.reserve_bet("alice").expect("first reservation");
        // Second reservation while the first debit is in flight.
        assert!(matches!(
            round.reserve_bet("alice"),
            Err(EngineError::DuplicateBet(_))
        ));
        // Releasing makes the slot available again.
        round.release_reservation("alice");
        round.reserve_bet("alice").expect("after release");
    }

    #[test]
    fn test_commit_after_crash_fails() {
        let mut round = test_round(3.0);
        round.reserve_bet("alice").expect("reserve");
        assert!(round.crash(100));
        let err = round
            .commit_bet("alice", Currency::Btc, 10.0, 0.001, 60_000.0, 110)
            .expect_err("commit into crashed round");
        assert!(matches!(err, EngineError::RoundAlreadyCrashed { .. }));
    }

    #[test]
    fn test_commit_without_duplicate_check_bypass() {
        // A bet already on the ledger blocks a commit outright, even when the
        // committing call never went through this round's reservation.
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        let err = round
            .commit_bet("alice", Currency::Btc, 5.0, 0.0001, 60_000.0, 20)
            .expect_err("second commit");
        assert!(matches!(err, EngineError::DuplicateBet(_)));
        assert_eq!(round.bets().len(), 1);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let round = test_round(3.0);
        let a = round.elapsed_ms();
        let b = round.elapsed_ms();
        assert!(a >= 0);
        assert!(b >= a);
    }

    #[test]
    fn test_cash_out_below_crash_point() {
        let mut round = test_round(3.0);
        let bet = place(&mut round, "alice", 10.0);
        let cashed = round
            .cash_out_bet("alice", 2.5, 60_000.0, 50)
            .expect("cash out");
        assert_eq!(cashed.cashout_multiplier, Some(2.5));
        assert!((cashed.payout_crypto - bet.amount_crypto * 2.5).abs() < 1e-12);
        assert!((round.total_paid_out_usd - cashed.payout_usd).abs() < 1e-9);
    }

    #[test]
    fn test_cash_out_at_crash_point_rejected() {
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        // Strict inequality: equal to the crash point is already post-crash.
        assert!(matches!(
            round.cash_out_bet("alice", 3.0, 60_000.0, 50),
            Err(EngineError::RoundAlreadyCrashed { .. })
        ));
    }

    #[test]
    fn test_second_cash_out_rejected() {
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        round
            .cash_out_bet("alice", 2.5, 60_000.0, 50)
            .expect("first cash out");
        assert!(matches!(
            round.cash_out_bet("alice", 2.6, 60_000.0, 60),
            Err(EngineError::AlreadyCashedOut(_))
        ));
    }

    #[test]
    fn test_cash_out_without_bet_rejected() {
        let mut round = test_round(3.0);
        assert!(matches!(
            round.cash_out_bet("bob", 1.5, 60_000.0, 50),
            Err(EngineError::NoOpenBet(_))
        ));
    }

    #[test]
    fn test_crash_is_one_way_and_once() {
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        assert!(round.crash(100));
        assert!(!round.crash(200), "second crash must be a no-op");
        assert_eq!(round.state, RoundState::Crashed);
        assert_eq!(round.final_multiplier, 3.0);
        assert_eq!(round.ended_at_ms, Some(100));
        // Ledger frozen: late cash-out rejected.
        assert!(matches!(
            round.cash_out_bet("alice", 2.0, 60_000.0, 210),
            Err(EngineError::RoundAlreadyCrashed { .. })
        ));
    }

    #[test]
    fn test_seed_hidden_until_crash() {
        let mut round = test_round(3.0);
        assert!(round.revealed_seed().is_none());
        round.crash(100);
        assert_eq!(round.revealed_seed(), Some("ab".repeat(32).as_str()));
        round.mark_settled();
        assert!(round.revealed_seed().is_some());
    }

    #[test]
    fn test_revert_cash_out_restores_ledger() {
        let mut round = test_round(3.0);
        place(&mut round, "alice", 10.0);
        round
            .cash_out_bet("alice", 2.0, 60_000.0, 50)
            .expect("cash out");
        assert!(round.revert_cash_out("alice"));
        let bet = round.open_bet("alice").expect("open again");
        assert!(bet.cashout_multiplier.is_none());
        assert_eq!(round.total_paid_out_usd, 0.0);
        // Not allowed once the round crashed: the ledger is frozen.
        round
            .cash_out_bet("alice", 2.0, 60_000.0, 60)
            .expect("cash out again");
        round.crash(100);
        assert!(!round.revert_cash_out("alice"));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!(Currency::parse("btc").unwrap(), Currency::Btc);
        assert_eq!(Currency::parse("ETH").unwrap(), Currency::Eth);
        assert!(matches!(
            Currency::parse("DOGE"),
            Err(EngineError::InvalidCurrency(_))
        ));
    }
}
