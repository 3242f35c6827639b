//! The live multiplier curve.
//!
//! Pure functions of elapsed time. Deliberately decoupled from the
//! fairness generator: the curve only defines how fast the multiplier rises,
//! not where the round will crash. The two meet in the engine's tick, which
//! compares the live value against the round's crash point.

/// Round to the 2-decimal form published to clients. Rounding a monotonic
/// curve stays monotonic (non-decreasing).
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Multiplier after `elapsed_ms` milliseconds:
/// `1 + (elapsed_ms * growth_factor)^1.5`, elapsed clamped to >= 0.
///
/// The engine feeds this from a monotonic elapsed source, never from wall
/// clock differences, so published ticks cannot go backwards.
pub fn multiplier_after(elapsed_ms: i64, growth_factor: f64) -> f64 {
    let elapsed = elapsed_ms.max(0) as f64;
    round2(1.0 + (elapsed * growth_factor).powf(1.5))
}

/// [`multiplier_after`] for a pair of timestamps on the same clock. Used when
/// retro-validating reported times, not for live ticking.
pub fn multiplier_at(start_ms: i64, now_ms: i64, growth_factor: f64) -> f64 {
    multiplier_after(now_ms - start_ms, growth_factor)
}

/// Inverse of [`multiplier_at`]: elapsed milliseconds needed to reach
/// `multiplier`. Returns 0 for targets at or below the starting value.
pub fn time_to_multiplier(multiplier: f64, growth_factor: f64) -> u64 {
    if multiplier <= 1.0 {
        return 0;
    }
    let elapsed_ms = (multiplier - 1.0).powf(1.0 / 1.5) / growth_factor;
    elapsed_ms.round() as u64
}

/// Retro-validate a reported cash-out: the multiplier must be strictly below
/// the crash point, at least 1.0, and no more than `epsilon` above what the
/// curve allows at `cashout_ms` (slack for network delay).
pub fn plausible_cashout(
    start_ms: i64,
    cashout_ms: i64,
    multiplier: f64,
    crash_point: f64,
    growth_factor: f64,
    epsilon: f64,
) -> bool {
    if multiplier >= crash_point {
        return false;
    }
    let expected = multiplier_at(start_ms, cashout_ms, growth_factor);
    (1.0..=expected + epsilon).contains(&multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROWTH: f64 = 0.000_06;

    #[test]
    fn test_multiplier_starts_at_one() {
        assert_eq!(multiplier_after(0, GROWTH), 1.0);
        assert_eq!(multiplier_at(1_000, 1_000, GROWTH), 1.0);
        // Negative elapsed clamps to the floor.
        assert_eq!(multiplier_after(-500, GROWTH), 1.0);
        assert_eq!(multiplier_at(1_000, 500, GROWTH), 1.0);
    }

    #[test]
    fn test_multiplier_five_seconds_in() {
        // 1 + (5000 * 0.00006)^1.5 = 1.16431... -> 1.16 published
        let m = multiplier_at(0, 5_000, GROWTH);
        assert!((m - 1.16).abs() < 1e-9, "got {m}");
    }

    #[test]
    fn test_multiplier_monotonic_non_decreasing() {
        let mut prev = 0.0;
        for t in (0..60_000).step_by(100) {
            let m = multiplier_at(0, t, GROWTH);
            assert!(m >= prev, "curve decreased at t={t}: {m} < {prev}");
            prev = m;
        }
    }

    #[test]
    fn test_time_to_multiplier_inverts_curve() {
        for target in [1.5, 2.0, 5.0, 10.0] {
            let t = time_to_multiplier(target, GROWTH);
            let reached = multiplier_at(0, t as i64, GROWTH);
            assert!(
                (reached - target).abs() < 0.02,
                "target {target}: t={t} reaches {reached}"
            );
        }
        assert_eq!(time_to_multiplier(1.0, GROWTH), 0);
        assert_eq!(time_to_multiplier(0.5, GROWTH), 0);
    }

    #[test]
    fn test_plausible_cashout_bounds() {
        // ~2.0x is reachable around t=16.7s at this growth factor.
        let t = time_to_multiplier(2.0, GROWTH) as i64;
        assert!(plausible_cashout(0, t, 2.0, 3.0, GROWTH, 0.1));
        // At or above the crash point is never plausible.
        assert!(!plausible_cashout(0, t, 3.0, 3.0, GROWTH, 0.1));
        // Far beyond what the curve allows at that instant.
        assert!(!plausible_cashout(0, 100, 5.0, 50.0, GROWTH, 0.1));
        // Below the floor.
        assert!(!plausible_cashout(0, t, 0.9, 3.0, GROWTH, 0.1));
    }
}
