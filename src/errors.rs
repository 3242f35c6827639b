//! Error types for the crash game engine.
//!
//! The taxonomy separates errors the caller can act on (validation and state
//! conflicts, rejected with no state change) from resource failures (any partial
//! wallet movement is rolled back before these are returned) and infrastructure
//! failures (logged and retried, never blocking the live round).

use crate::round::Currency;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // Validation errors: rejected synchronously, no state change.
    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),

    #[error("Bet of ${amount_usd} outside allowed range ${min_usd}..=${max_usd}")]
    BetOutOfBounds {
        amount_usd: f64,
        min_usd: f64,
        max_usd: f64,
    },

    // State-conflict errors: rejected synchronously, no state change.
    #[error("No active round")]
    NoActiveRound,

    #[error("Player {0} already has a bet in this round")]
    DuplicateBet(String),

    #[error("Player {0} has no open bet in this round")]
    NoOpenBet(String),

    #[error("Player {0} already cashed out")]
    AlreadyCashedOut(String),

    #[error("Round {round_id} already crashed at {crash_point}x")]
    RoundAlreadyCrashed { round_id: String, crash_point: f64 },

    // Resource errors: partial debits are rolled back before returning.
    #[error("Insufficient {currency} balance for player {player}")]
    InsufficientBalance { player: String, currency: Currency },

    #[error("Wallet operation failed: {0}")]
    Wallet(String),

    // Infrastructure errors: persistence is best-effort relative to gameplay.
    #[error("Persistence operation failed: {0}")]
    Persistence(String),

    #[error("Price unavailable for {0}: {1}")]
    PriceUnavailable(Currency, String),

    // Fatal: never fall back to an unfair computation.
    #[error(transparent)]
    Fairness(#[from] FairnessError),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

/// Fairness generator failures are programming/configuration errors; round
/// creation aborts rather than degrading to an unverifiable outcome.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FairnessError {
    #[error("Seed must be {expected} hex chars, got {actual}")]
    InvalidSeedLength { expected: usize, actual: usize },

    #[error("Seed is not valid hex")]
    InvalidSeedEncoding,

    #[error("Invalid fairness configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// True for errors that leave engine state untouched and are safe to
    /// surface verbatim to the requesting player.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidCurrency(_)
                | EngineError::BetOutOfBounds { .. }
                | EngineError::NoActiveRound
                | EngineError::DuplicateBet(_)
                | EngineError::NoOpenBet(_)
                | EngineError::AlreadyCashedOut(_)
                | EngineError::RoundAlreadyCrashed { .. }
                | EngineError::InsufficientBalance { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::DuplicateBet("player-1".to_string());
        assert!(err.to_string().contains("player-1"));

        let err = EngineError::RoundAlreadyCrashed {
            round_id: "round_7".to_string(),
            crash_point: 2.41,
        };
        assert!(err.to_string().contains("round_7"));
        assert!(err.to_string().contains("2.41"));
    }

    #[test]
    fn test_rejections_have_no_side_effects_flag() {
        assert!(EngineError::NoActiveRound.is_rejection());
        assert!(EngineError::InsufficientBalance {
            player: "p".to_string(),
            currency: Currency::Btc,
        }
        .is_rejection());
        assert!(!EngineError::Persistence("db down".to_string()).is_rejection());
        assert!(!EngineError::ShuttingDown.is_rejection());
    }

    #[test]
    fn test_fairness_error_conversion() {
        let err: EngineError = FairnessError::InvalidSeedLength {
            expected: 64,
            actual: 10,
        }
        .into();
        assert!(matches!(err, EngineError::Fairness(_)));
    }
}
