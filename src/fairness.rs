//! Provably-fair crash point derivation.
//!
//! Commit-reveal scheme: a secret per-round seed is generated before the round,
//! its SHA-256 commitment is published at round start, and the seed itself is
//! revealed at settlement. Anyone can then recompute the commitment and the
//! crash point and match them against the published values.
//!
//! The external contract (verifiers must reproduce it bit-exactly):
//! - `hash = sha256_hex("{seed}:{round_number}")`
//! - `x = u32(hash[0..8]) / 0xFFFFFFFF`, scaled by `(1 - house_edge)`
//! - `crash = clamp(max(1.0, ln(1 - x) / ln(1 - decay_constant)), max_multiplier)`
//!
//! The decay constant shapes the crash distribution; it and the house edge
//! live in [`FairnessConfig`] and are part of the published proof.

use crate::config::FairnessConfig;
use crate::errors::FairnessError;
use crate::multiplier::round2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Seed length in raw bytes (256 bits of entropy).
pub const SEED_BYTES: usize = 32;
/// Seed length in its hex-encoded form.
pub const SEED_HEX_LEN: usize = SEED_BYTES * 2;

/// Fixed tolerance for [`FairnessGenerator::verify`]. Covers the 2-decimal
/// rounding of published crash points; not player-configurable.
pub const VERIFY_TOLERANCE: f64 = 0.01;

/// Everything a round needs from the fairness generator, produced once at
/// round creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSpec {
    pub round_number: u64,
    /// Secret until settlement.
    pub seed: String,
    /// Published commitment, `sha256(seed:round_number)`.
    pub hash: String,
    /// Terminal multiplier, rounded to the published 2-decimal form.
    pub crash_point: f64,
}

/// Proof bundle revealed to auditors after settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessProof {
    pub seed: String,
    pub round_number: u64,
    pub hash: String,
    pub crash_point: f64,
    pub algorithm: String,
    pub house_edge: f64,
    pub decay_constant: f64,
    pub max_multiplier: f64,
}

/// Aggregate view of a crash-point history, published alongside the proofs so
/// players can sanity-check the realized distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashStatistics {
    pub rounds: usize,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Share of rounds that crashed below 2x.
    pub under_2x_share: f64,
    /// Share of rounds that crashed above 10x.
    pub over_10x_share: f64,
}

/// Summarize a history of crash points. `None` for an empty history.
pub fn crash_statistics(crash_points: &[f64]) -> Option<CrashStatistics> {
    if crash_points.is_empty() {
        return None;
    }
    let mut sorted = crash_points.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    Some(CrashStatistics {
        rounds: n,
        min: sorted[0],
        max: sorted[n - 1],
        median,
        under_2x_share: sorted.iter().filter(|c| **c < 2.0).count() as f64 / n as f64,
        over_10x_share: sorted.iter().filter(|c| **c > 10.0).count() as f64 / n as f64,
    })
}

/// Deterministic, verifiable crash point generator.
pub struct FairnessGenerator {
    config: FairnessConfig,
}

impl FairnessGenerator {
    pub fn new(config: FairnessConfig) -> Result<Self, FairnessError> {
        if !(0.0..1.0).contains(&config.house_edge) {
            return Err(FairnessError::InvalidConfig(
                "house_edge must be in [0, 1)".to_string(),
            ));
        }
        if config.decay_constant <= 0.0 || config.decay_constant >= 1.0 {
            return Err(FairnessError::InvalidConfig(
                "decay_constant must be in (0, 1)".to_string(),
            ));
        }
        if config.max_multiplier < 1.0 {
            return Err(FairnessError::InvalidConfig(
                "max_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Generate a fresh secret seed: 32 CSPRNG bytes, hex encoded.
    pub fn generate_seed(&self) -> String {
        let mut bytes = [0u8; SEED_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Commitment hash over seed and round number.
    pub fn derive_hash(&self, seed: &str, round_number: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", seed, round_number).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Derive the crash point for a round. Deterministic: identical inputs
    /// always produce the identical value.
    pub fn derive_crash_point(&self, seed: &str, round_number: u64) -> f64 {
        let hash = self.derive_hash(seed, round_number);
        // First 8 hex chars of a sha256 digest always parse.
        let prefix = u32::from_str_radix(&hash[..8], 16).unwrap_or(0);
        let normalized = prefix as f64 / u32::MAX as f64;
        let adjusted = normalized * (1.0 - self.config.house_edge);

        if adjusted == 0.0 {
            return 1.0; // Instant crash.
        }

        let crash = (1.0 - adjusted).ln() / (1.0 - self.config.decay_constant).ln();
        crash.max(1.0).min(self.config.max_multiplier)
    }

    /// Recompute and compare a claimed crash point within [`VERIFY_TOLERANCE`].
    pub fn verify(&self, seed: &str, round_number: u64, claimed_crash_point: f64) -> bool {
        let actual = self.derive_crash_point(seed, round_number);
        (actual - claimed_crash_point).abs() < VERIFY_TOLERANCE
    }

    /// Assemble seed, commitment and crash point for a new round.
    ///
    /// A seed of the wrong shape is a programming error in the caller, not a
    /// runtime condition: round creation must abort rather than proceed with
    /// an unverifiable outcome.
    pub fn round_spec(
        &self,
        round_number: u64,
        custom_seed: Option<String>,
    ) -> Result<RoundSpec, FairnessError> {
        let seed = match custom_seed {
            Some(seed) => {
                validate_seed(&seed)?;
                seed
            }
            None => self.generate_seed(),
        };
        let hash = self.derive_hash(&seed, round_number);
        let crash_point = round2(self.derive_crash_point(&seed, round_number));
        Ok(RoundSpec {
            round_number,
            seed,
            hash,
            crash_point,
        })
    }

    /// Proof bundle for the verification surface, revealed after settlement.
    pub fn proof(&self, seed: &str, round_number: u64) -> FairnessProof {
        FairnessProof {
            seed: seed.to_string(),
            round_number,
            hash: self.derive_hash(seed, round_number),
            crash_point: round2(self.derive_crash_point(seed, round_number)),
            algorithm: "SHA256".to_string(),
            house_edge: self.config.house_edge,
            decay_constant: self.config.decay_constant,
            max_multiplier: self.config.max_multiplier,
        }
    }

    pub fn max_multiplier(&self) -> f64 {
        self.config.max_multiplier
    }
}

fn validate_seed(seed: &str) -> Result<(), FairnessError> {
    if seed.len() != SEED_HEX_LEN {
        return Err(FairnessError::InvalidSeedLength {
            expected: SEED_HEX_LEN,
            actual: seed.len(),
        });
    }
    if hex::decode(seed).is_err() {
        return Err(FairnessError::InvalidSeedEncoding);
    }
    Ok(())
}
