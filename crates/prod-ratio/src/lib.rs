#![deny(warnings)]

//! Production ratio math: balanced building counts for a chain.
//!
//! Given the cycle duration of every building in a chain, this crate finds
//! the smallest integer building counts that keep all outputs in step, and
//! the shortest common cycle (the "base") after which every building has
//! finished a whole number of cycles.
//!
//! All arithmetic happens on exact integers:
//! - durations are scaled by the LCM of their denominators
//! - `base` is the LCM of the scaled durations, scaled back and rounded
//! - ratios are the scaled durations divided by their common GCD

use prod_core::Minutes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use prod_core::gcd;

/// Resolution used when exact scaling would overflow: 1/1000 minute.
pub const FALLBACK_RESOLUTION: u128 = 1000;

/// Balanced building counts for a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioResult {
    /// Shortest cycle, in whole minutes, after which every building has
    /// completed a whole number of cycles.
    pub base: u64,
    /// One count per positive input duration, in input order, in lowest terms.
    pub ratios: Vec<u64>,
}

impl RatioResult {
    /// Result for input with no usable duration.
    pub fn empty() -> Self {
        Self {
            base: 1,
            ratios: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }
}

/// Least common multiple. `lcm(a, 0) == 0`; `None` on overflow.
pub fn lcm(a: u128, b: u128) -> Option<u128> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b)
}

/// GCD of a whole sequence, seeded with its first element. Empty input gives 0.
pub fn gcd_all(values: &[u128]) -> u128 {
    match values.split_first() {
        Some((first, rest)) => rest.iter().fold(*first, |acc, &v| gcd(acc, v)),
        None => 0,
    }
}

/// Divide every element by the GCD of the sequence. A zero GCD leaves the
/// values unchanged.
pub fn reduce_to_lowest_terms(values: &mut [u128]) {
    let g = gcd_all(values);
    if g == 0 {
        return;
    }
    for v in values.iter_mut() {
        *v /= g;
    }
}

/// Compute ratios for durations given as decimal minutes.
///
/// Non-positive and non-finite durations are skipped; every other value gets
/// a ratio. Each value is read back through its shortest decimal form before
/// the exact calculation, so `1.5` and `2.25` behave as `3/2` and `9/4`.
/// Values outside the decimal range use their binary value instead.
///
/// Example:
/// let r = calculate_optimal_ratios(&[0.5, 1.0]);
/// assert_eq!(r.ratios, vec![1, 2]);
pub fn calculate_optimal_ratios(durations: &[f64]) -> RatioResult {
    let exact: Vec<Minutes> = durations
        .iter()
        .filter(|d| d.is_finite() && **d > 0.0)
        .filter_map(|&d| Minutes::from_f64_lossy(d))
        .collect();
    calculate_ratios_exact(&exact)
}

/// Compute ratios for exact durations. Zero durations are skipped.
///
/// A building that takes twice as long per cycle is needed twice as often,
/// so every ratio is proportional to its building's duration.
pub fn calculate_ratios_exact(durations: &[Minutes]) -> RatioResult {
    let valid: Vec<Minutes> = durations.iter().copied().filter(|d| !d.is_zero()).collect();
    if valid.is_empty() {
        return RatioResult::empty();
    }

    let (scaled, multiplier) = match scale_to_integers(&valid) {
        Some(v) => v,
        None => {
            warn!(
                count = valid.len(),
                "exact scaling overflowed, quantizing durations to 1/1000 minute"
            );
            (quantize(&valid), FALLBACK_RESOLUTION)
        }
    };

    let base = match scaled.iter().try_fold(scaled[0], |acc, &v| lcm(acc, v)) {
        Some(l) => u64::try_from(div_round_half_up(l, multiplier)).unwrap_or(u64::MAX),
        None => {
            warn!(count = scaled.len(), "common cycle overflowed, base saturated");
            u64::MAX
        }
    };

    let mut reduced = scaled;
    reduce_to_lowest_terms(&mut reduced);
    let ratios = fit_ratios(reduced);

    debug!(multiplier = %multiplier, base, ?ratios, "computed production ratios");
    RatioResult { base, ratios }
}

/// Scale every duration by the LCM of the denominators. `None` on overflow.
fn scale_to_integers(durations: &[Minutes]) -> Option<(Vec<u128>, u128)> {
    let multiplier = durations
        .iter()
        .try_fold(1u128, |acc, d| lcm(acc, d.denom()))?;
    let scaled = durations
        .iter()
        .map(|d| d.numer().checked_mul(multiplier / d.denom()))
        .collect::<Option<Vec<_>>>()?;
    Some((scaled, multiplier))
}

/// Durations in thousandths of a minute, rounded, never below one.
fn quantize(durations: &[Minutes]) -> Vec<u128> {
    durations
        .iter()
        .map(|d| {
            let thousandths = match d.numer().checked_mul(FALLBACK_RESOLUTION) {
                Some(n) => div_round_half_up(n, d.denom()),
                None => (d.numer() / d.denom()).saturating_mul(FALLBACK_RESOLUTION),
            };
            thousandths.max(1)
        })
        .collect()
}

/// Narrow reduced ratios to `u64`. When the largest does not fit, all are
/// shifted right by the same amount (rounded, never below one) and reduced
/// again, so proportions are kept as closely as 64 bits allow.
fn fit_ratios(mut ratios: Vec<u128>) -> Vec<u64> {
    let max = ratios.iter().copied().max().unwrap_or(0);
    if max > u64::MAX as u128 {
        let shift = 64 - max.leading_zeros();
        warn!(shift, "ratios exceed 64 bits, scaled down");
        for r in ratios.iter_mut() {
            let half = (*r >> (shift - 1)) & 1;
            *r = ((*r >> shift) + half).clamp(1, u64::MAX as u128);
        }
        reduce_to_lowest_terms(&mut ratios);
    }
    ratios
        .into_iter()
        .map(|r| u64::try_from(r).unwrap_or(u64::MAX))
        .collect()
}

fn div_round_half_up(n: u128, d: u128) -> u128 {
    let q = n / d;
    let r = n % d;
    if r >= d - r {
        q + 1
    } else {
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check(durations: &[f64], base: u64, ratios: &[u64]) {
        let r = calculate_optimal_ratios(durations);
        assert_eq!(r.ratios, ratios, "ratios for {durations:?}");
        assert_eq!(r.base, base, "base for {durations:?}");
    }

    #[test]
    fn gcd_and_lcm_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(5, 0), 5);
        assert_eq!(gcd(0, 5), 5);
        assert_eq!(lcm(4, 6), Some(12));
        assert_eq!(lcm(3, 0), Some(0));
        assert_eq!(lcm(u128::MAX, 2), None);
        assert_eq!(gcd_all(&[]), 0);
        assert_eq!(gcd_all(&[12, 18, 8]), 2);
    }

    #[test]
    fn lowest_terms() {
        let mut v = [4, 6];
        reduce_to_lowest_terms(&mut v);
        assert_eq!(v, [2, 3]);
        let mut zeros = [0, 0];
        reduce_to_lowest_terms(&mut zeros);
        assert_eq!(zeros, [0, 0]);
    }

    #[test]
    fn reference_chains() {
        check(&[0.5, 1.0], 1, &[1, 2]);
        check(&[2.0, 1.5], 6, &[4, 3]);
        check(&[0.5, 1.0, 2.0], 2, &[1, 2, 4]);
        check(&[1.0, 1.5, 3.0], 3, &[2, 3, 6]);
        check(&[0.5, 1.0, 1.5, 2.0], 6, &[1, 2, 3, 4]);
        check(&[1.0, 2.0, 3.0, 4.0, 6.0], 12, &[1, 2, 3, 4, 6]);
        check(&[0.5, 1.0, 2.25], 9, &[2, 4, 9]);
        check(&[0.25, 0.5, 1.0, 2.0], 2, &[1, 2, 4, 8]);
        check(&[1.5, 2.0, 3.0, 4.5], 18, &[3, 4, 6, 9]);
        check(&[1.0, 1.5, 2.0, 2.5, 3.0, 4.0], 60, &[2, 3, 4, 5, 6, 8]);
    }

    #[test]
    fn degenerate_input() {
        assert_eq!(calculate_optimal_ratios(&[]), RatioResult::empty());
        assert_eq!(calculate_optimal_ratios(&[0.0, -1.0]), RatioResult::empty());
        assert_eq!(calculate_ratios_exact(&[Minutes::ZERO]), RatioResult::empty());
        assert!(RatioResult::empty().is_empty());
        assert_eq!(RatioResult::empty().base, 1);
    }

    #[test]
    fn invalid_values_are_skipped() {
        check(&[f64::NAN, 2.0, -3.0, f64::INFINITY, 3.0], 6, &[2, 3]);
    }

    #[test]
    fn single_and_equal_durations() {
        check(&[2.5], 3, &[1]);
        check(&[4.0], 4, &[1]);
        check(&[3.0, 3.0, 3.0], 3, &[1, 1, 1]);
    }

    #[test]
    fn clock_durations_stay_exact() {
        // 1:20 and 2:00
        let r = calculate_ratios_exact(&[Minutes::from_clock(1, 20), Minutes::whole(2)]);
        assert_eq!(r.ratios, vec![2, 3]);
        assert_eq!(r.base, 4);

        let third = Minutes::new(1, 3).unwrap();
        let r = calculate_ratios_exact(&[third, Minutes::whole(1)]);
        assert_eq!(r.ratios, vec![1, 3]);
        assert_eq!(r.base, 1);
    }

    #[test]
    fn overflowing_scale_falls_back_to_thousandths() {
        let e20 = 10u128.pow(20);
        let a = Minutes::new(e20, e20 + 1).unwrap();
        let b = Minutes::new(e20, e20 + 3).unwrap();
        let r = calculate_ratios_exact(&[a, b]);
        assert_eq!(r.ratios, vec![1, 1]);
        assert_eq!(r.base, 1);
    }

    #[test]
    fn durations_outside_decimal_range_keep_their_ratio() {
        let r = calculate_optimal_ratios(&[1e30, 1.0]);
        assert_eq!(r.ratios.len(), 2);
        assert!(r.ratios[0] > r.ratios[1]);

        let r = calculate_optimal_ratios(&[1e-30, 1.0]);
        assert_eq!(r.ratios.len(), 2);
        assert!(r.ratios[0] < r.ratios[1]);

        let r = calculate_optimal_ratios(&[1e30, 3e30]);
        assert_eq!(r.ratios.len(), 2);
        assert_eq!(gcd(r.ratios[0] as u128, r.ratios[1] as u128), 1);
        let ratio = r.ratios[1] as f64 / r.ratios[0] as f64;
        assert!((ratio - 3.0).abs() < 1e-9, "ratio {ratio}");
    }

    #[test]
    fn oversized_ratios_are_scaled_down() {
        let top = 1u128 << 100;
        let fitted = fit_ratios(vec![top, top * 3, 5]);
        assert_eq!(fitted, vec![1u64 << 62, 3u64 << 62, 1]);
        assert_eq!(fit_ratios(vec![2, 3]), vec![2, 3]);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(div_round_half_up(5, 2), 3);
        assert_eq!(div_round_half_up(4, 3), 1);
        assert_eq!(div_round_half_up(5, 3), 2);
        assert_eq!(div_round_half_up(6, 3), 2);
    }

    proptest! {
        #[test]
        fn one_ratio_per_positive_duration(
            ds in proptest::collection::vec(
                prop_oneof![-5.0f64..20.0, 1e-40f64..1e-20, 1e20f64..1e40],
                0..12,
            )
        ) {
            let r = calculate_optimal_ratios(&ds);
            let positive = ds.iter().filter(|d| **d > 0.0).count();
            prop_assert_eq!(r.ratios.len(), positive);
            if positive > 0 {
                let wide: Vec<u128> = r.ratios.iter().map(|&x| x as u128).collect();
                prop_assert_eq!(gcd_all(&wide), 1);
            }
        }

        #[test]
        fn scaling_durations_scales_base_only(ds in proptest::collection::vec(1u32..100, 1..8), k in 1u32..20) {
            let plain: Vec<f64> = ds.iter().map(|&d| d as f64).collect();
            let scaled: Vec<f64> = ds.iter().map(|&d| (d * k) as f64).collect();
            let a = calculate_optimal_ratios(&plain);
            let b = calculate_optimal_ratios(&scaled);
            prop_assert_eq!(&a.ratios, &b.ratios);
            prop_assert_eq!(a.base * k as u64, b.base);
        }

        #[test]
        fn ratios_balance_throughput(clock in proptest::collection::vec((0u64..10, 0u8..60), 1..8)) {
            let ds: Vec<Minutes> = clock
                .iter()
                .map(|&(m, s)| Minutes::from_clock(m, s))
                .filter(|d| !d.is_zero())
                .collect();
            prop_assume!(!ds.is_empty());
            let r = calculate_ratios_exact(&ds);
            prop_assert_eq!(r.ratios.len(), ds.len());
            let secs: Vec<u128> = ds.iter().map(|d| d.whole_seconds().unwrap()).collect();
            for i in 0..ds.len() {
                for j in 0..ds.len() {
                    prop_assert_eq!(r.ratios[i] as u128 * secs[j], r.ratios[j] as u128 * secs[i]);
                }
            }
        }
    }
}
