use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::FeatureVector;

/// A single landmark in frame pixel coordinates. `z` is model-relative depth (0 when unknown).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Planar Euclidean distance.
    pub fn distance(&self, other: &LandmarkPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Angle in degrees of the vector from `self` to `other`, via `atan2`.
    pub fn angle_to(&self, other: &LandmarkPoint) -> f32 {
        (other.y - self.y).atan2(other.x - self.x).to_degrees()
    }
}

/// Ordered landmarks for one detected face or hand, indexed by the model's mesh topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<LandmarkPoint>,
}

impl LandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[LandmarkPoint] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<LandmarkPoint> {
        self.points.get(index).copied()
    }

    /// Look up `preferred`, substituting `fallback` on a shorter-than-expected set.
    ///
    /// Returns the origin only when both indices are out of range.
    pub fn point_or(&self, preferred: usize, fallback: usize) -> LandmarkPoint {
        self.get(preferred)
            .or_else(|| self.get(fallback))
            .unwrap_or_default()
    }

    /// Axis-aligned bounds of all points, or `None` for an empty set.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// Bounding box of a detected face or hand, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face returned by a face capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    pub landmarks: LandmarkSet,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f32,
}

/// One hand returned by a hand capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandObservation {
    pub landmarks: LandmarkSet,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f32,
}

/// The fixed emotion label set, in canonical order (used for tie-breaks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 5] = [
        EmotionLabel::Neutral,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability per emotion label.
///
/// Values produced by [`EmotionDistribution::normalized`] are non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionDistribution {
    pub neutral: f64,
    pub happy: f64,
    pub sad: f64,
    pub angry: f64,
    pub surprised: f64,
}

impl EmotionDistribution {
    pub fn from_values(values: [f64; 5]) -> Self {
        let [neutral, happy, sad, angry, surprised] = values;
        Self {
            neutral,
            happy,
            sad,
            angry,
            surprised,
        }
    }

    pub fn values(&self) -> [f64; 5] {
        [self.neutral, self.happy, self.sad, self.angry, self.surprised]
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        self.values()[label.index()]
    }

    pub fn sum(&self) -> f64 {
        self.values().iter().sum()
    }

    /// Clamp negatives to zero and divide by the total.
    ///
    /// An all-zero input becomes uniform.
    pub fn normalized(&self) -> Self {
        let clamped = self.values().map(|v| v.max(0.0));
        let total: f64 = clamped.iter().sum();
        if total <= 0.0 {
            return Self::from_values([0.2; 5]);
        }
        Self::from_values(clamped.map(|v| v / total))
    }

    /// Highest-probability label; ties go to the earliest label in canonical order.
    pub fn dominant(&self) -> EmotionLabel {
        let mut best = EmotionLabel::Neutral;
        for label in EmotionLabel::ALL {
            if self.get(label) > self.get(best) {
                best = label;
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        EmotionLabel::ALL.into_iter().map(|l| (l, self.get(l)))
    }
}

/// Which inference path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    #[serde(rename = "AI")]
    Ai,
    Fallback,
}

/// Face summary attached to a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMeta {
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    pub landmark_count: usize,
}

/// Hand summary attached to a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandMeta {
    pub hands_detected: usize,
    pub confidence: f32,
    pub landmark_count: usize,
}

/// Per-cycle diagnostics, owned by the result they describe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleDiagnostics {
    pub landmark_count: usize,
    pub hand_count: usize,
    pub features: Option<FeatureVector>,
    pub cycle_ms: f64,
    pub fallback_reason: Option<String>,
}

/// The outcome of one completed detection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub dominant_mood: EmotionLabel,
    pub distribution: EmotionDistribution,
    pub face: Option<FaceMeta>,
    pub hand: Option<HandMeta>,
    pub timestamp: DateTime<Utc>,
    pub mode: DetectionMode,
    pub diagnostics: CycleDiagnostics,
}

impl DetectionResult {
    /// Build a result, deriving `dominant_mood` from the distribution.
    pub fn new(
        distribution: EmotionDistribution,
        mode: DetectionMode,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            dominant_mood: distribution.dominant(),
            distribution,
            face: None,
            hand: None,
            timestamp,
            mode,
            diagnostics: CycleDiagnostics::default(),
        }
    }
}
