//! Geometric feature extraction from a face-mesh landmark set.
//!
//! Measurements are in frame pixels (y grows downward). The thresholds are
//! calibration constants shared with existing fixtures; do not retune them.

use crate::types::{LandmarkPoint, LandmarkSet};
use serde::{Deserialize, Serialize};

/// Below this many points the geometry is considered unreliable.
pub const MIN_LANDMARKS: usize = 20;

const EYEBROW_RAISED_MIN: f32 = 25.0;
const EYEBROW_LOWERED_MAX: f32 = 15.0;
const EYEBROW_INWARD_ANGLE: f32 = 15.0;
const EYES_WIDE_OPEN_MIN: f32 = 15.0;
const MOUTH_OPEN_RATIO: f32 = 0.3;

/// A mesh index plus the low index substituted when the set is too short.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    preferred: usize,
    fallback: usize,
}

impl Anchor {
    const fn new(preferred: usize, fallback: usize) -> Self {
        Self {
            preferred,
            fallback,
        }
    }

    fn resolve(self, landmarks: &LandmarkSet) -> LandmarkPoint {
        landmarks.point_or(self.preferred, self.fallback)
    }
}

// 468-point face mesh topology. Fallbacks stay below MIN_LANDMARKS.
const MOUTH_LEFT: Anchor = Anchor::new(61, 0);
const MOUTH_RIGHT: Anchor = Anchor::new(291, 1);
const UPPER_LIP: Anchor = Anchor::new(13, 2);
const LOWER_LIP: Anchor = Anchor::new(14, 3);
const LEFT_EYEBROW_OUTER: Anchor = Anchor::new(70, 4);
const LEFT_EYEBROW_INNER: Anchor = Anchor::new(107, 5);
const RIGHT_EYEBROW_OUTER: Anchor = Anchor::new(300, 6);
const RIGHT_EYEBROW_INNER: Anchor = Anchor::new(336, 7);
const LEFT_EYE_TOP: Anchor = Anchor::new(159, 8);
const LEFT_EYE_BOTTOM: Anchor = Anchor::new(145, 9);
const RIGHT_EYE_TOP: Anchor = Anchor::new(386, 10);
const RIGHT_EYE_BOTTOM: Anchor = Anchor::new(374, 11);

/// Named measurements derived from one landmark set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub mouth_width: f32,
    pub mouth_height: f32,
    /// Width over height, with the height floored at 1px.
    pub mouth_ratio: f32,
    pub mouth_corner_diff: f32,
    pub is_mouth_turned_down: bool,
    pub is_mouth_open: bool,
    pub left_eyebrow_height: f32,
    pub right_eyebrow_height: f32,
    pub eyebrow_raised: bool,
    pub eyebrow_lowered: bool,
    /// Degrees, inner to outer point.
    pub left_eyebrow_angle: f32,
    pub right_eyebrow_angle: f32,
    pub eyebrows_angled_inward: bool,
    pub left_eye_openness: f32,
    pub right_eye_openness: f32,
    pub eyes_wide_open: bool,
}

/// Converts a face landmark set into a [`FeatureVector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LandmarkFeatureExtractor;

impl LandmarkFeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Returns `None` for sets shorter than [`MIN_LANDMARKS`].
    pub fn extract(&self, landmarks: &LandmarkSet) -> Option<FeatureVector> {
        if landmarks.len() < MIN_LANDMARKS {
            tracing::debug!(count = landmarks.len(), "too few landmarks for feature extraction");
            return None;
        }

        let mouth_left = MOUTH_LEFT.resolve(landmarks);
        let mouth_right = MOUTH_RIGHT.resolve(landmarks);
        let upper_lip = UPPER_LIP.resolve(landmarks);
        let lower_lip = LOWER_LIP.resolve(landmarks);

        let mouth_width = mouth_left.distance(&mouth_right);
        let mouth_height = upper_lip.distance(&lower_lip);
        let mouth_ratio = mouth_width / mouth_height.max(1.0);
        let mouth_corner_diff = (mouth_left.y - mouth_right.y).abs();

        let mouth_center_y = (upper_lip.y + lower_lip.y) / 2.0;
        let is_mouth_turned_down = mouth_left.y > mouth_center_y && mouth_right.y > mouth_center_y;
        let is_mouth_open = mouth_height > MOUTH_OPEN_RATIO * mouth_width;

        let left_brow_outer = LEFT_EYEBROW_OUTER.resolve(landmarks);
        let left_brow_inner = LEFT_EYEBROW_INNER.resolve(landmarks);
        let right_brow_outer = RIGHT_EYEBROW_OUTER.resolve(landmarks);
        let right_brow_inner = RIGHT_EYEBROW_INNER.resolve(landmarks);
        let left_eye_top = LEFT_EYE_TOP.resolve(landmarks);
        let left_eye_bottom = LEFT_EYE_BOTTOM.resolve(landmarks);
        let right_eye_top = RIGHT_EYE_TOP.resolve(landmarks);
        let right_eye_bottom = RIGHT_EYE_BOTTOM.resolve(landmarks);

        let left_eyebrow_height = (left_brow_outer.y - left_eye_top.y).abs();
        let right_eyebrow_height = (right_brow_outer.y - right_eye_top.y).abs();
        let eyebrow_raised =
            left_eyebrow_height > EYEBROW_RAISED_MIN || right_eyebrow_height > EYEBROW_RAISED_MIN;
        let eyebrow_lowered =
            left_eyebrow_height < EYEBROW_LOWERED_MAX || right_eyebrow_height < EYEBROW_LOWERED_MAX;

        let left_eyebrow_angle = left_brow_inner.angle_to(&left_brow_outer);
        let right_eyebrow_angle = right_brow_inner.angle_to(&right_brow_outer);
        let eyebrows_angled_inward =
            left_eyebrow_angle < -EYEBROW_INWARD_ANGLE && right_eyebrow_angle > EYEBROW_INWARD_ANGLE;

        let left_eye_openness = (left_eye_top.y - left_eye_bottom.y).abs();
        let right_eye_openness = (right_eye_top.y - right_eye_bottom.y).abs();
        let eyes_wide_open =
            left_eye_openness > EYES_WIDE_OPEN_MIN || right_eye_openness > EYES_WIDE_OPEN_MIN;

        Some(FeatureVector {
            mouth_width,
            mouth_height,
            mouth_ratio,
            mouth_corner_diff,
            is_mouth_turned_down,
            is_mouth_open,
            left_eyebrow_height,
            right_eyebrow_height,
            eyebrow_raised,
            eyebrow_lowered,
            left_eyebrow_angle,
            right_eyebrow_angle,
            eyebrows_angled_inward,
            left_eye_openness,
            right_eye_openness,
            eyes_wide_open,
        })
    }
}
