//! Delay and drop decisions for the simulated network.
//!
//! The network only asks two questions per leg: "how long does this take" and
//! "is this lost". Keeping the answers behind traits lets tests pin them down
//! (fixed delay, forced drop) without touching the dispatch code.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the latency of one leg.
pub trait DelayPolicy: Send + Sync {
    /// A delay in `[min, max]`, whole milliseconds.
    fn next_delay(&self, min: Duration, max: Duration) -> Duration;
}

/// Decides whether one leg is lost.
pub trait DropPolicy: Send + Sync {
    /// Bernoulli trial with the given probability. No memory across calls.
    fn should_drop(&self, probability: f64) -> bool;
}

fn bounds_ms(min: Duration, max: Duration) -> (u64, u64) {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if lo > hi {
        (hi, lo)
    } else {
        (lo, hi)
    }
}

fn clamp_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        return 0.0;
    }
    probability.clamp(0.0, 1.0)
}

/// Uniform delay in `[min, max]` from the thread-local RNG.
pub fn next_delay(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = bounds_ms(min, max);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

/// Bernoulli trial from the thread-local RNG.
pub fn should_drop(probability: f64) -> bool {
    rand::rng().random_bool(clamp_probability(probability))
}

/// Thread-RNG backed policy, the default for a live network.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl DelayPolicy for RandomPolicy {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        next_delay(min, max)
    }
}

impl DropPolicy for RandomPolicy {
    fn should_drop(&self, probability: f64) -> bool {
        should_drop(probability)
    }
}

/// Reproducible policy: the same seed yields the same delays and drops.
#[derive(Debug)]
pub struct SeededPolicy {
    rng: Mutex<StdRng>,
}

impl SeededPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DelayPolicy for SeededPolicy {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = bounds_ms(min, max);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.random_range(lo..=hi))
    }
}

impl DropPolicy for SeededPolicy {
    fn should_drop(&self, probability: f64) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_bool(clamp_probability(probability))
    }
}

/// Ignores the configured range and always waits the same time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelayPolicy for FixedDelay {
    fn next_delay(&self, _min: Duration, _max: Duration) -> Duration {
        self.0
    }
}

/// Never loses a message, whatever the configured rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDrop;

impl DropPolicy for NeverDrop {
    fn should_drop(&self, _probability: f64) -> bool {
        false
    }
}

/// Loses every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDrop;

impl DropPolicy for AlwaysDrop {
    fn should_drop(&self, _probability: f64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_inclusive_range() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(20);
        for _ in 0..1000 {
            let d = next_delay(min, max);
            assert!(d >= min && d <= max, "delay out of range: {d:?}");
        }
    }

    #[test]
    fn equal_bounds_give_exact_delay() {
        let d = Duration::from_millis(250);
        assert_eq!(next_delay(d, d), d);
        assert_eq!(SeededPolicy::new(1).next_delay(d, d), d);
    }

    #[test]
    fn inverted_bounds_do_not_panic() {
        let d = next_delay(Duration::from_millis(30), Duration::from_millis(10));
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(30));
    }

    #[test]
    fn extreme_probabilities_are_deterministic() {
        for _ in 0..100 {
            assert!(!should_drop(0.0));
            assert!(should_drop(1.0));
        }
        assert!(!should_drop(-3.0));
        assert!(should_drop(7.0));
        assert!(!should_drop(f64::NAN));
    }

    #[test]
    fn seeded_policy_is_reproducible() {
        let a = SeededPolicy::new(42);
        let b = SeededPolicy::new(42);
        let min = Duration::from_millis(1000);
        let max = Duration::from_millis(3000);
        for _ in 0..50 {
            assert_eq!(a.next_delay(min, max), b.next_delay(min, max));
            assert_eq!(a.should_drop(0.2), b.should_drop(0.2));
        }
    }

    #[test]
    fn drop_rate_roughly_matches_probability() {
        let policy = SeededPolicy::new(7);
        let dropped = (0..10_000).filter(|_| policy.should_drop(0.2)).count();
        assert!((1500..2500).contains(&dropped), "dropped {dropped} of 10000");
    }

    #[test]
    fn fixed_and_forced_policies_ignore_configuration() {
        let fixed = FixedDelay(Duration::from_millis(5));
        assert_eq!(
            fixed.next_delay(Duration::from_secs(1), Duration::from_secs(3)),
            Duration::from_millis(5)
        );
        assert!(!NeverDrop.should_drop(1.0));
        assert!(AlwaysDrop.should_drop(0.0));
    }

    mod proptest_policies {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_stays_within_any_range(lo in 0u64..100_000, span in 0u64..100_000, seed in any::<u64>()) {
                let min = Duration::from_millis(lo);
                let max = Duration::from_millis(lo + span);

                let d = next_delay(min, max);
                prop_assert!(d >= min && d <= max, "{:?} outside [{:?}, {:?}]", d, min, max);

                let d = SeededPolicy::new(seed).next_delay(min, max);
                prop_assert!(d >= min && d <= max, "{:?} outside [{:?}, {:?}]", d, min, max);
            }

            #[test]
            fn same_seed_replays_same_decisions(seed in any::<u64>(), p in 0.0f64..1.0) {
                let a = SeededPolicy::new(seed);
                let b = SeededPolicy::new(seed);
                for _ in 0..16 {
                    prop_assert_eq!(a.should_drop(p), b.should_drop(p));
                    prop_assert_eq!(
                        a.next_delay(Duration::ZERO, Duration::from_secs(3)),
                        b.next_delay(Duration::ZERO, Duration::from_secs(3))
                    );
                }
            }

            #[test]
            fn any_probability_is_accepted(p in any::<f64>()) {
                let _ = should_drop(p);
                let _ = SeededPolicy::new(1).should_drop(p);
            }
        }
    }
}
