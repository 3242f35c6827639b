//! Crash game round engine.
//!
//! Runs the authoritative lifecycle of a multiplayer "crash" betting game:
//! a provably-fair crash point is committed (via its hash) before each round,
//! a time-based multiplier ticks upward while players bet and cash out, and
//! the round crashes when the multiplier reaches the pre-derived crash point.
//! After settlement the seed is revealed so anyone can verify the outcome.
//!
//! Transport, storage and market data are collaborator ports
//! ([`ports::WalletPort`], [`ports::PricePort`], [`ports::PersistencePort`],
//! [`ports::BroadcastPort`]); the engine only defines the round lifecycle,
//! the fairness protocol and the bet/cash-out contract.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod multiplier;
pub mod ports;
pub mod round;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::{CrashEngine, EngineSnapshot, TickOutcome};
pub use errors::{EngineError, EngineResult, FairnessError};
pub use fairness::{crash_statistics, CrashStatistics, FairnessGenerator, FairnessProof, RoundSpec};
pub use ports::{GameEvent, TransactionEntry, TransactionKind};
pub use round::{Bet, Currency, Round, RoundState};
pub use scheduler::{RoundScheduler, ShutdownHandle};
