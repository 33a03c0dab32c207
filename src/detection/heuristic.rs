use super::{
    distance_factor, tilt_factor, DetectionSignal, Detector, DetectorKind, DetectorTuning, Frame,
    HandObservation, Point,
};

/// Fraction of changed face pixels above which the frame counts as moving.
const MOTION_RATIO_THRESHOLD: f64 = 0.01;

const WEIGHT_DISTANCE: f64 = 0.4;
const WEIGHT_TILT: f64 = 0.4;
const WEIGHT_MOTION: f64 = 0.2;

/// Face-box + hand-centroid engine.
///
/// Picks the largest face and the hand closest to it, uses the face box roll as
/// head tilt and the centre-to-centre distance as hand/face proximity.
pub struct HeuristicDetector {
    tuning: DetectorTuning,
}

impl HeuristicDetector {
    pub fn new(tuning: DetectorTuning) -> Self {
        Self { tuning }
    }

    fn closest_hand<'a>(hands: &'a [HandObservation], target: &Point) -> Option<&'a HandObservation> {
        hands.iter().min_by(|a, b| {
            a.center
                .distance_to(target)
                .total_cmp(&b.center.distance_to(target))
        })
    }
}

impl Detector for HeuristicDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Heuristic
    }

    fn detect(&mut self, frame: &Frame) -> DetectionSignal {
        let Some(face) = frame
            .faces
            .iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
        else {
            return DetectionSignal::empty(frame.timestamp);
        };

        let face_center = face.center();
        let head_tilt_deg = face.roll_deg.abs();

        let Some(hand) = Self::closest_hand(&frame.hands, &face_center) else {
            return DetectionSignal {
                face_detected: true,
                head_tilt_deg,
                ..DetectionSignal::empty(frame.timestamp)
            };
        };

        let distance = hand.center.distance_to(&face_center);
        let motion_score = frame
            .motion_ratio
            .map(|ratio| if ratio > MOTION_RATIO_THRESHOLD { ratio } else { 0.0 });
        let moving = motion_score.map(|score| score > 0.0).unwrap_or(false);

        let confidence = WEIGHT_DISTANCE
            * distance_factor(distance, self.tuning.hand_face_distance_threshold_px)
            + WEIGHT_TILT * tilt_factor(head_tilt_deg, self.tuning.head_tilt_threshold_deg)
            + if moving { WEIGHT_MOTION } else { 0.0 };

        DetectionSignal {
            confidence: confidence.clamp(0.0, 1.0),
            face_detected: true,
            hand_detected: true,
            head_tilt_deg,
            hand_face_distance_px: distance,
            motion_score,
            timestamp: frame.timestamp,
        }
    }
}
