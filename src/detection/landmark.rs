use super::{
    distance_factor, tilt_factor, DetectionSignal, Detector, DetectorKind, DetectorTuning,
    FaceLandmarks, Frame, Point,
};

/// Minimum points per eye before the eye-line angle is trusted.
const MIN_EYE_POINTS: usize = 3;
/// Hand model score below which a hand observation is ignored.
const HAND_SCORE_THRESHOLD: f64 = 0.5;

const WEIGHT_DISTANCE: f64 = 0.35;
const WEIGHT_TILT: f64 = 0.25;
const WEIGHT_HAND_SCORE: f64 = 0.4;

/// Landmark-model engine: mouth centre vs wrist distance, eye-line tilt.
pub struct LandmarkModelDetector {
    tuning: DetectorTuning,
}

impl LandmarkModelDetector {
    pub fn new(tuning: DetectorTuning) -> Self {
        Self { tuning }
    }

    fn head_tilt_deg(landmarks: &FaceLandmarks) -> f64 {
        if landmarks.left_eye.len() < MIN_EYE_POINTS || landmarks.right_eye.len() < MIN_EYE_POINTS
        {
            return 0.0;
        }
        match (
            Point::centroid(&landmarks.left_eye),
            Point::centroid(&landmarks.right_eye),
        ) {
            (Some(left), Some(right)) => (right.y - left.y).atan2(right.x - left.x).to_degrees().abs(),
            _ => 0.0,
        }
    }
}

impl Detector for LandmarkModelDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::LandmarkModel
    }

    fn detect(&mut self, frame: &Frame) -> DetectionSignal {
        let Some(landmarks) = frame.face_landmarks.as_ref() else {
            return DetectionSignal::empty(frame.timestamp);
        };
        let head_tilt_deg = Self::head_tilt_deg(landmarks);

        let face_only = DetectionSignal {
            face_detected: true,
            head_tilt_deg,
            ..DetectionSignal::empty(frame.timestamp)
        };

        let Some(mouth) = Point::centroid(&landmarks.mouth) else {
            return face_only;
        };

        let Some((wrist, hand_score)) = frame
            .hands
            .iter()
            .filter_map(|hand| {
                let score = hand.score.unwrap_or(1.0);
                (score >= HAND_SCORE_THRESHOLD).then(|| (hand.wrist.unwrap_or(hand.center), score))
            })
            .min_by(|(a, _), (b, _)| a.distance_to(&mouth).total_cmp(&b.distance_to(&mouth)))
        else {
            return face_only;
        };

        let distance = wrist.distance_to(&mouth);
        let confidence = WEIGHT_DISTANCE
            * distance_factor(distance, self.tuning.hand_face_distance_threshold_px)
            + WEIGHT_TILT * tilt_factor(head_tilt_deg, self.tuning.head_tilt_threshold_deg)
            + WEIGHT_HAND_SCORE * hand_score;

        DetectionSignal {
            confidence: confidence.clamp(0.0, 1.0),
            face_detected: true,
            hand_detected: true,
            head_tilt_deg,
            hand_face_distance_px: distance,
            motion_score: frame.motion_ratio,
            timestamp: frame.timestamp,
        }
    }
}
