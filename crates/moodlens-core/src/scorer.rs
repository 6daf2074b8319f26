//! Heuristic emotion scoring over a [`FeatureVector`].
//!
//! Each emotion is scored independently, jittered, and normalized into an
//! [`EmotionDistribution`]. Caps and thresholds are empirical calibration
//! values kept verbatim.

use crate::features::FeatureVector;
use crate::types::EmotionDistribution;
use rand::Rng;

// --- Calibration constants ---
const SADNESS_CAP: f64 = 0.7;
const ANGER_CAP: f64 = 0.6;
const SURPRISE_CAP: f64 = 0.9;
const HAPPINESS_CAP: f64 = 0.95;
/// Applied after neutral has been derived from the raw scores.
const HAPPINESS_FINAL_CAP: f64 = 0.7;
const NEUTRAL_BASE: f64 = 0.4;
const NEUTRAL_FLOOR: f64 = 0.05;
const NEGATIVE_FLOOR: f64 = 0.1;
const EYEBROW_ANGLE_THRESHOLD: f32 = 15.0;
const JITTER: f64 = 0.025;

/// Returned when no usable features exist. Already sums to 1.
pub const DEFAULT_DISTRIBUTION: EmotionDistribution = EmotionDistribution {
    neutral: 0.17,
    happy: 0.50,
    sad: 0.10,
    angry: 0.08,
    surprised: 0.15,
};

/// Maps features to a 5-way emotion distribution.
#[derive(Debug, Clone, Copy)]
pub struct EmotionScorer {
    jitter: f64,
}

impl Default for EmotionScorer {
    fn default() -> Self {
        Self { jitter: JITTER }
    }
}

impl EmotionScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scorer without per-label noise. Used where repeatable output matters.
    pub fn without_jitter() -> Self {
        Self { jitter: 0.0 }
    }

    /// Score `features`, or return [`DEFAULT_DISTRIBUTION`] when there are none.
    pub fn score<R: Rng>(
        &self,
        features: Option<&FeatureVector>,
        rng: &mut R,
    ) -> EmotionDistribution {
        let Some(f) = features else {
            return DEFAULT_DISTRIBUTION;
        };

        let raw = raw_scores(f);
        let jittered = raw.values().map(|v| {
            let noise = if self.jitter > 0.0 {
                rng.gen_range(-self.jitter..=self.jitter)
            } else {
                0.0
            };
            (v + noise).max(0.0)
        });

        EmotionDistribution::from_values(jittered).normalized()
    }
}

/// Per-label scores before jitter and normalization.
pub fn raw_scores(f: &FeatureVector) -> EmotionDistribution {
    let sad = sadness(f.is_mouth_turned_down, f.mouth_corner_diff, f.mouth_ratio);
    let angry = anger(
        f.eyebrow_lowered,
        f.eyebrows_angled_inward,
        f.left_eyebrow_angle,
        f.right_eyebrow_angle,
    );
    let surprised = surprise(f.eyebrow_raised, f.eyes_wide_open, f.is_mouth_open);
    let happy = happiness(f.mouth_ratio, f.is_mouth_turned_down);

    let neutral = (NEUTRAL_BASE - (sad + angry + surprised + happy) / 2.0).max(NEUTRAL_FLOOR);

    EmotionDistribution {
        neutral,
        happy: happy.min(HAPPINESS_FINAL_CAP),
        sad: sad.max(NEGATIVE_FLOOR),
        angry: angry.max(NEGATIVE_FLOOR),
        surprised: surprised.max(NEGATIVE_FLOOR),
    }
}

pub fn sadness(is_mouth_turned_down: bool, mouth_corner_diff: f32, mouth_ratio: f32) -> f64 {
    let mut score = 0.0;
    if is_mouth_turned_down {
        score += 0.4;
    }
    if mouth_corner_diff > 4.0 {
        score += 0.2;
    } else if mouth_corner_diff > 2.5 {
        score += 0.1;
    }
    if mouth_ratio < 1.5 {
        score += 0.15;
    }
    f64::min(score, SADNESS_CAP)
}

pub fn anger(
    eyebrow_lowered: bool,
    eyebrows_angled_inward: bool,
    left_angle: f32,
    right_angle: f32,
) -> f64 {
    let mut score = 0.0;
    if eyebrow_lowered {
        score += 0.3;
    }
    if eyebrows_angled_inward {
        score += 0.25;
    } else if left_angle < -EYEBROW_ANGLE_THRESHOLD || right_angle > EYEBROW_ANGLE_THRESHOLD {
        score += 0.15;
    }
    f64::min(score, ANGER_CAP)
}

pub fn surprise(eyebrow_raised: bool, eyes_wide_open: bool, is_mouth_open: bool) -> f64 {
    let mut score = 0.0;
    if eyebrow_raised {
        score += 0.4;
    }
    if eyes_wide_open {
        score += 0.3;
    }
    if is_mouth_open {
        score += 0.3;
    }
    f64::min(score, SURPRISE_CAP)
}

pub fn happiness(mouth_ratio: f32, is_mouth_turned_down: bool) -> f64 {
    let mut score: f64 = if mouth_ratio > 3.0 {
        0.8
    } else if mouth_ratio > 2.5 {
        0.6
    } else if mouth_ratio > 2.0 {
        0.4
    } else if mouth_ratio > 1.5 {
        0.2
    } else {
        0.0
    };
    if is_mouth_turned_down {
        score = (score - 0.2).max(0.0);
    }
    score.min(HAPPINESS_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmotionLabel;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn happy_face() -> FeatureVector {
        FeatureVector {
            mouth_ratio: 3.2,
            ..Default::default()
        }
    }

    fn surprised_face() -> FeatureVector {
        FeatureVector {
            mouth_ratio: 1.0,
            eyebrow_raised: true,
            eyes_wide_open: true,
            is_mouth_open: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_distribution_without_features() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = EmotionScorer::new().score(None, &mut rng);
        assert_eq!(d, DEFAULT_DISTRIBUTION);
        assert!((d.sum() - 1.0).abs() < 1e-9);
        assert_eq!(d.dominant(), EmotionLabel::Happy);
    }

    #[test]
    fn test_happy_scenario() {
        let f = happy_face();
        assert!((happiness(f.mouth_ratio, f.is_mouth_turned_down) - 0.8).abs() < 1e-9);

        let raw = raw_scores(&f);
        assert!((raw.happy - 0.7).abs() < 1e-9);
        assert!((raw.neutral - 0.05).abs() < 1e-9);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = EmotionScorer::new().score(Some(&f), &mut rng);
            assert_eq!(d.dominant(), EmotionLabel::Happy);
        }
    }

    #[test]
    fn test_surprise_scenario() {
        let f = surprised_face();
        assert!((surprise(f.eyebrow_raised, f.eyes_wide_open, f.is_mouth_open) - 0.9).abs() < 1e-9);

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let d = EmotionScorer::new().score(Some(&f), &mut rng);
            assert_eq!(d.dominant(), EmotionLabel::Surprised);
        }
    }

    #[test]
    fn test_sadness_tiers() {
        assert!((sadness(true, 5.0, 1.0) - 0.7).abs() < 1e-9);
        assert!((sadness(false, 3.0, 2.0) - 0.1).abs() < 1e-9);
        assert!((sadness(false, 4.5, 2.0) - 0.2).abs() < 1e-9);
        assert_eq!(sadness(false, 0.0, 2.0), 0.0);
    }

    #[test]
    fn test_anger_tiers() {
        assert!((anger(true, true, -20.0, 20.0) - 0.55).abs() < 1e-9);
        assert!((anger(true, false, -20.0, 0.0) - 0.45).abs() < 1e-9);
        assert!((anger(false, false, 0.0, 16.0) - 0.15).abs() < 1e-9);
        assert_eq!(anger(false, false, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_happiness_turned_down_floor() {
        assert!((happiness(2.6, true) - 0.4).abs() < 1e-9);
        assert_eq!(happiness(1.6, true), 0.0);
        assert_eq!(happiness(1.0, false), 0.0);
    }

    #[test]
    fn test_negative_floors_applied() {
        let raw = raw_scores(&FeatureVector {
            mouth_ratio: 2.0,
            ..Default::default()
        });
        assert!((raw.sad - 0.1).abs() < 1e-9);
        assert!((raw.angry - 0.1).abs() < 1e-9);
        assert!((raw.surprised - 0.1).abs() < 1e-9);
        assert!((raw.neutral - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_without_jitter_is_repeatable() {
        let f = happy_face();
        let mut rng = StdRng::seed_from_u64(3);
        let a = EmotionScorer::without_jitter().score(Some(&f), &mut rng);
        let b = EmotionScorer::without_jitter().score(Some(&f), &mut rng);
        assert_eq!(a, b);
        assert_eq!(a, raw_scores(&f).normalized());
    }

    prop_compose! {
        fn arb_features()(
            mouth_ratio in 0.0f32..10.0,
            mouth_corner_diff in 0.0f32..20.0,
            left in -180.0f32..180.0,
            right in -180.0f32..180.0,
            flags in proptest::array::uniform7(any::<bool>()),
        ) -> FeatureVector {
            FeatureVector {
                mouth_ratio,
                mouth_corner_diff,
                left_eyebrow_angle: left,
                right_eyebrow_angle: right,
                is_mouth_turned_down: flags[0],
                is_mouth_open: flags[1],
                eyebrow_raised: flags[2],
                eyebrow_lowered: flags[3],
                eyebrows_angled_inward: flags[4],
                eyes_wide_open: flags[5],
                ..Default::default()
            }
        }
    }

    proptest! {
        #[test]
        fn prop_score_is_a_distribution(f in arb_features(), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let d = EmotionScorer::new().score(Some(&f), &mut rng);
            prop_assert!(d.values().iter().all(|&v| v >= 0.0));
            prop_assert!((d.sum() - 1.0).abs() < 1e-6);
        }

        #[test]
        fn prop_dominant_is_argmax(f in arb_features(), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let d = EmotionScorer::new().score(Some(&f), &mut rng);
            let best = d.get(d.dominant());
            for (label, value) in d.iter() {
                prop_assert!(value <= best);
                if value == best {
                    prop_assert_eq!(label, d.dominant());
                    break;
                }
            }
        }
    }
}
