//! Time-cycled simulated emotion signal for degraded mode.

use crate::types::EmotionDistribution;
use rand::Rng;
use std::ops::Range;

/// Length of one simulated mood cycle.
pub const CYCLE_MILLIS: i64 = 30_000;

/// Per-label sampling ranges, in canonical label order.
type Profile = [Range<f64>; 5];

// [neutral, happy, sad, angry, surprised]
const HAPPY_BIASED: Profile = [0.1..0.3, 0.5..0.8, 0.0..0.1, 0.0..0.1, 0.05..0.2];
const NEUTRAL_BIASED: Profile = [0.5..0.8, 0.1..0.3, 0.05..0.15, 0.0..0.1, 0.0..0.1];
const MIXED: Profile = [0.15..0.35, 0.15..0.35, 0.1..0.3, 0.05..0.25, 0.1..0.3];

/// Which profile is active for a position in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedPhase {
    HappyBiased,
    NeutralBiased,
    Mixed,
}

impl SimulatedPhase {
    /// Phase for `cycle_position` in `[0, 1)`.
    pub fn at(cycle_position: f64) -> Self {
        if cycle_position < 0.3 {
            SimulatedPhase::HappyBiased
        } else if cycle_position < 0.6 {
            SimulatedPhase::NeutralBiased
        } else {
            SimulatedPhase::Mixed
        }
    }

    fn profile(self) -> &'static Profile {
        match self {
            SimulatedPhase::HappyBiased => &HAPPY_BIASED,
            SimulatedPhase::NeutralBiased => &NEUTRAL_BIASED,
            SimulatedPhase::Mixed => &MIXED,
        }
    }
}

/// Fraction of the current 30 s cycle elapsed at `now_millis`.
pub fn cycle_position(now_millis: i64) -> f64 {
    now_millis.rem_euclid(CYCLE_MILLIS) as f64 / CYCLE_MILLIS as f64
}

/// Produces biased random distributions independent of any landmark input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSimulator;

impl FallbackSimulator {
    pub fn new() -> Self {
        Self
    }

    pub fn simulate<R: Rng>(&self, now_millis: i64, rng: &mut R) -> EmotionDistribution {
        let phase = SimulatedPhase::at(cycle_position(now_millis));
        let values = phase.profile().clone().map(|range| rng.gen_range(range));
        EmotionDistribution::from_values(values).normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_cycle_position_wraps() {
        assert_eq!(cycle_position(0), 0.0);
        assert_eq!(cycle_position(15_000), 0.5);
        assert_eq!(cycle_position(30_000), 0.0);
        assert!((cycle_position(-7_500) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(SimulatedPhase::at(0.0), SimulatedPhase::HappyBiased);
        assert_eq!(SimulatedPhase::at(0.2999), SimulatedPhase::HappyBiased);
        assert_eq!(SimulatedPhase::at(0.3), SimulatedPhase::NeutralBiased);
        assert_eq!(SimulatedPhase::at(0.6), SimulatedPhase::Mixed);
        assert_eq!(SimulatedPhase::at(0.9999), SimulatedPhase::Mixed);
    }

    #[test]
    fn test_happy_phase_favors_happy() {
        let mut rng = StdRng::seed_from_u64(42);
        let sim = FallbackSimulator::new();
        let n = 500;
        let (mut happy, mut sad, mut angry) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let d = sim.simulate(i * 17 % 9_000, &mut rng);
            happy += d.happy;
            sad += d.sad;
            angry += d.angry;
        }
        assert!(happy > sad);
        assert!(happy > angry);
    }

    #[test]
    fn test_neutral_phase_favors_neutral() {
        let mut rng = StdRng::seed_from_u64(5);
        let d = FallbackSimulator::new().simulate(12_000, &mut rng);
        assert!(d.neutral > d.sad && d.neutral > d.angry && d.neutral > d.surprised);
    }

    proptest! {
        #[test]
        fn prop_simulate_sums_to_one(now in any::<i64>(), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let d = FallbackSimulator::new().simulate(now, &mut rng);
            prop_assert!(d.values().iter().all(|&v| v >= 0.0));
            prop_assert!((d.sum() - 1.0).abs() < 1e-6);
        }
    }
}
