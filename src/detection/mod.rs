//! Detection engines and the per-frame signal they produce.
//!
//! Engines never see pixels here: a [`Frame`] carries observations already
//! extracted by whatever vision stack feeds the tracker (face boxes, hand
//! centroids, landmark points, a motion ratio). Each engine turns one frame into
//! exactly one [`DetectionSignal`], including frames where nothing was found.

mod heuristic;
mod landmark;

pub use heuristic::HeuristicDetector;
pub use landmark::LandmarkModelDetector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One structured measurement per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSignal {
    pub confidence: f64,
    pub face_detected: bool,
    pub hand_detected: bool,
    /// Tilt magnitude in degrees, always non-negative.
    pub head_tilt_deg: f64,
    pub hand_face_distance_px: f64,
    pub motion_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl DetectionSignal {
    /// Signal for a frame in which neither face nor hand was found.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            confidence: 0.0,
            face_detected: false,
            hand_detected: false,
            head_tilt_deg: 0.0,
            hand_face_distance_px: f64::INFINITY,
            motion_score: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Axis-aligned face box as reported by a cascade-style face finder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// In-plane rotation of the box in degrees, signed.
    pub roll_deg: f64,
}

impl FaceBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Landmark subset used by the landmark-model engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub mouth: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandObservation {
    pub center: Point,
    pub wrist: Option<Point>,
    /// Handedness/classification score from the hand model, if any.
    pub score: Option<f64>,
}

/// Pre-extracted observations for one camera frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub faces: Vec<FaceBox>,
    pub face_landmarks: Option<FaceLandmarks>,
    pub hands: Vec<HandObservation>,
    /// Fraction of the face region that changed since the previous frame.
    pub motion_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorKind {
    Heuristic,
    LandmarkModel,
    Custom,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Heuristic => "heuristic",
            DetectorKind::LandmarkModel => "landmark_model",
            DetectorKind::Custom => "custom",
        }
    }
}

impl Default for DetectorKind {
    fn default() -> Self {
        DetectorKind::Heuristic
    }
}

/// Thresholds the engines use to normalise their confidence factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorTuning {
    pub head_tilt_threshold_deg: f64,
    pub hand_face_distance_threshold_px: f64,
}

impl Default for DetectorTuning {
    fn default() -> Self {
        Self {
            head_tilt_threshold_deg: 25.0,
            hand_face_distance_threshold_px: 100.0,
        }
    }
}

/// A swappable detection engine.
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    fn detect(&mut self, frame: &Frame) -> DetectionSignal;

    fn is_available(&self) -> bool {
        true
    }
}

/// Wraps a caller-supplied closure as a detection engine.
pub struct CustomDetector {
    detect_fn: Box<dyn FnMut(&Frame) -> DetectionSignal + Send>,
}

impl CustomDetector {
    pub fn new<F>(detect_fn: F) -> Self
    where
        F: FnMut(&Frame) -> DetectionSignal + Send + 'static,
    {
        Self {
            detect_fn: Box::new(detect_fn),
        }
    }
}

impl Detector for CustomDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Custom
    }

    fn detect(&mut self, frame: &Frame) -> DetectionSignal {
        (self.detect_fn)(frame)
    }
}

/// Build one of the built-in engines. `Custom` has no built-in form and yields
/// `None`; construct a [`CustomDetector`] directly instead.
pub fn build_detector(kind: DetectorKind, tuning: DetectorTuning) -> Option<Box<dyn Detector>> {
    match kind {
        DetectorKind::Heuristic => Some(Box::new(HeuristicDetector::new(tuning))),
        DetectorKind::LandmarkModel => Some(Box::new(LandmarkModelDetector::new(tuning))),
        DetectorKind::Custom => None,
    }
}

/// Proximity factor in [0, 1]: 1 when touching, 0 at or beyond the threshold.
pub(crate) fn distance_factor(distance_px: f64, threshold_px: f64) -> f64 {
    if threshold_px <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_px / threshold_px).max(0.0)
}

/// Tilt factor in [0, 1], saturating once the threshold is reached.
pub(crate) fn tilt_factor(tilt_deg: f64, threshold_deg: f64) -> f64 {
    if threshold_deg <= 0.0 {
        return 1.0;
    }
    (tilt_deg.abs() / threshold_deg).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_of_points() {
        let c = Point::centroid(&[Point::new(0.0, 0.0), Point::new(4.0, 2.0)]).unwrap();
        assert_eq!(c, Point::new(2.0, 1.0));
        assert!(Point::centroid(&[]).is_none());
    }

    #[test]
    fn custom_detector_forwards_to_closure() {
        let mut detector = CustomDetector::new(|frame| {
            let mut signal = DetectionSignal::empty(frame.timestamp);
            signal.confidence = 0.42;
            signal
        });
        let frame = Frame::default();
        assert_eq!(detector.kind(), DetectorKind::Custom);
        assert_eq!(detector.detect(&frame).confidence, 0.42);
    }

    #[test]
    fn factors_are_bounded() {
        assert_eq!(distance_factor(0.0, 100.0), 1.0);
        assert_eq!(distance_factor(150.0, 100.0), 0.0);
        assert_eq!(tilt_factor(-50.0, 25.0), 1.0);
        assert!((tilt_factor(12.5, 25.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn builtin_engines_build() {
        let tuning = DetectorTuning::default();
        assert!(build_detector(DetectorKind::Heuristic, tuning).is_some());
        assert!(build_detector(DetectorKind::LandmarkModel, tuning).is_some());
        assert!(build_detector(DetectorKind::Custom, tuning).is_none());
    }
}
