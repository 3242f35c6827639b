//! Engine configuration with validation and defaults.
//!
//! Centralized configuration following the same sub-config layout as the rest
//! of the platform: every section has a `Default`, the whole tree is
//! serde-serializable, and `validate()` catches logically inconsistent values
//! before the engine starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub fairness: FairnessConfig,
    pub round: RoundConfig,
    pub betting: BettingConfig,
    pub multiplier: MultiplierConfig,
}

/// Parameters of the provably-fair crash point derivation.
///
/// All three values are part of the published fairness proof: a verifier must
/// use identical values to reproduce a round's crash point. The house edge is
/// applied here, inside derivation; it is intentionally decoupled from the
/// multiplier growth factor, which only shapes how fast the curve rises.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// Fraction of the normalized hash value retained by the house.
    pub house_edge: f64,
    /// Decay constant of the inverse-exponential crash distribution.
    pub decay_constant: f64,
    /// Hard cap on the crash point.
    pub max_multiplier: f64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.01,
            decay_constant: 0.01,
            max_multiplier: 100.0,
        }
    }
}

/// Round lifecycle timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Multiplier recomputation cadence while a round is active.
    pub tick_interval_ms: u64,
    /// Hard wall-clock deadline forcing a crash even if ticking stalls.
    pub max_duration_ms: u64,
    /// Pause between a crash and the next round start.
    pub cooldown_ms: u64,
    /// Delay before retrying a failed round creation.
    pub retry_backoff_ms: u64,
    /// Give up creating a round after this many consecutive failures.
    pub create_max_attempts: u32,
    /// Persistence retry budget during settlement.
    pub settle_max_attempts: u32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            max_duration_ms: 10_000,
            cooldown_ms: 3_000,
            retry_backoff_ms: 5_000,
            create_max_attempts: 10,
            settle_max_attempts: 5,
        }
    }
}

/// Bet acceptance bounds (USD).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BettingConfig {
    pub min_bet_usd: f64,
    pub max_bet_usd: f64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet_usd: 0.01,
            max_bet_usd: 10_000.0,
        }
    }
}

/// Multiplier curve parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiplierConfig {
    /// Growth factor of `1 + (elapsed_ms * growth_factor)^1.5`.
    pub growth_factor: f64,
    /// Tolerance when retro-validating a reported cash-out multiplier against
    /// the curve. Configuration rather than business logic: deployments with
    /// high network latency may widen it.
    pub cashout_epsilon: f64,
}

impl Default for MultiplierConfig {
    fn default() -> Self {
        Self {
            growth_factor: 0.000_06,
            cashout_epsilon: 0.1,
        }
    }
}

impl EngineConfig {
    /// Compressed timings for tests: short rounds, fast ticks, no long waits.
    pub fn fast_test() -> Self {
        Self {
            round: RoundConfig {
                tick_interval_ms: 10,
                max_duration_ms: 500,
                cooldown_ms: 50,
                retry_backoff_ms: 50,
                create_max_attempts: 3,
                settle_max_attempts: 2,
            },
            ..Default::default()
        }
    }

    /// Validate logical consistency before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.0..1.0).contains(&self.fairness.house_edge) {
            return Err(ConfigValidationError::InvalidValue(
                "house_edge must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.fairness.decay_constant) || self.fairness.decay_constant == 0.0
        {
            return Err(ConfigValidationError::InvalidValue(
                "decay_constant must be in (0, 1)".to_string(),
            ));
        }
        if self.fairness.max_multiplier < 1.0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.round.tick_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "tick_interval_ms must be > 0".to_string(),
            ));
        }
        if self.round.max_duration_ms < self.round.tick_interval_ms {
            return Err(ConfigValidationError::LogicalInconsistency(
                "max_duration_ms shorter than a single tick".to_string(),
            ));
        }
        if self.betting.min_bet_usd <= 0.0 || self.betting.max_bet_usd < self.betting.min_bet_usd {
            return Err(ConfigValidationError::LogicalInconsistency(
                "bet bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.multiplier.growth_factor <= 0.0 {
            return Err(ConfigValidationError::InvalidValue(
                "growth_factor must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.round.tick_interval_ms)
    }

    pub fn max_round_duration(&self) -> Duration {
        Duration::from_millis(self.round.max_duration_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.round.cooldown_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.round.retry_backoff_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
}
