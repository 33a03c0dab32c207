//! Synthetic frame source replaying a scripted drinking gesture.
//!
//! Each cycle has four equal phases: resting, hand approaching the face,
//! drinking (hand at the mouth, head tilted back), and hand leaving. Phases
//! last a fixed wall-clock time whatever the frame rate, so with the default
//! aggregator settings every drinking phase yields exactly one sip.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::detection::{FaceBox, FaceLandmarks, Frame, HandObservation, Point};

const FACE_CENTER: Point = Point { x: 320.0, y: 160.0 };
const FACE_WIDTH: f64 = 240.0;
const FACE_HEIGHT: f64 = 288.0;
const MOUTH_OFFSET_Y: f64 = 48.0;
const EYE_OFFSET_X: f64 = 40.0;
const EYE_OFFSET_Y: f64 = -30.0;

/// Length of each phase. Longer than the default minimum sip duration and
/// shorter than two sips plus a cooldown.
const PHASE_DURATION_MS: u64 = 1_600;

const REST_HAND: Point = Point { x: 420.0, y: 240.0 };
const DRINK_HAND: Point = Point { x: 330.0, y: 200.0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DemoPhase {
    Resting,
    Approaching,
    Drinking,
    Leaving,
}

pub struct DemoFeed {
    rng: StdRng,
    start: DateTime<Utc>,
    frame_interval_us: i64,
    phase_frames: u64,
    frame_index: u64,
}

impl DemoFeed {
    pub fn new(start: DateTime<Utc>, fps: u32, seed: u64) -> Self {
        let fps = fps.max(1);
        let phase_frames = ((PHASE_DURATION_MS * u64::from(fps) + 500) / 1000).max(1);
        Self {
            rng: StdRng::seed_from_u64(seed),
            start,
            frame_interval_us: 1_000_000 / i64::from(fps),
            phase_frames,
            frame_index: 0,
        }
    }

    pub fn phase_frames(&self) -> u64 {
        self.phase_frames
    }

    /// Frames in one full rest, approach, drink, leave cycle.
    pub fn cycle_frames(&self) -> u64 {
        self.phase_frames * 4
    }

    pub fn phase_at(&self, frame_index: u64) -> DemoPhase {
        match (frame_index % self.cycle_frames()) / self.phase_frames {
            0 => DemoPhase::Resting,
            1 => DemoPhase::Approaching,
            2 => DemoPhase::Drinking,
            _ => DemoPhase::Leaving,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn next_frame(&mut self) -> Frame {
        let index = self.frame_index;
        self.frame_index += 1;

        let timestamp = self.start + Duration::microseconds(self.frame_interval_us * index as i64);
        let phase = self.phase_at(index);
        let in_phase = index % self.phase_frames;
        let progress = in_phase as f64 / self.phase_frames as f64;

        let (hand, roll_deg) = match phase {
            DemoPhase::Resting => (REST_HAND, 0.0),
            DemoPhase::Approaching => (lerp(REST_HAND, DRINK_HAND, progress), 0.0),
            DemoPhase::Drinking => {
                let wobble = (in_phase as f64 * 0.2).sin();
                (DRINK_HAND, 32.0 + 6.0 * wobble)
            }
            DemoPhase::Leaving => (lerp(DRINK_HAND, REST_HAND, progress), 0.0),
        };

        let jitter = Point::new(
            self.rng.gen_range(-2.0..2.0),
            self.rng.gen_range(-2.0..2.0),
        );
        let hand = Point::new(hand.x + jitter.x, hand.y + jitter.y);

        let motion_ratio = match phase {
            DemoPhase::Resting => self.rng.gen_range(0.0..0.005),
            _ => self.rng.gen_range(0.03..0.08),
        };

        Frame {
            timestamp,
            faces: vec![FaceBox {
                x: FACE_CENTER.x - FACE_WIDTH / 2.0,
                y: FACE_CENTER.y - FACE_HEIGHT / 2.0,
                width: FACE_WIDTH,
                height: FACE_HEIGHT,
                roll_deg,
            }],
            face_landmarks: Some(landmarks(roll_deg)),
            hands: vec![HandObservation {
                center: hand,
                wrist: Some(hand),
                score: Some(self.rng.gen_range(0.8..0.99)),
            }],
            motion_ratio: Some(motion_ratio),
        }
    }
}

impl Iterator for DemoFeed {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        Some(self.next_frame())
    }
}

fn lerp(from: Point, to: Point, t: f64) -> Point {
    Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
}

/// Eye and mouth points rotated about the face centre by `roll_deg`.
fn landmarks(roll_deg: f64) -> FaceLandmarks {
    let (sin, cos) = roll_deg.to_radians().sin_cos();
    let place = |dx: f64, dy: f64| {
        Point::new(
            FACE_CENTER.x + dx * cos - dy * sin,
            FACE_CENTER.y + dx * sin + dy * cos,
        )
    };
    let cluster = |cx: f64, cy: f64| {
        vec![
            place(cx - 6.0, cy),
            place(cx, cy - 3.0),
            place(cx + 6.0, cy),
            place(cx, cy + 3.0),
        ]
    };

    FaceLandmarks {
        left_eye: cluster(-EYE_OFFSET_X, EYE_OFFSET_Y),
        right_eye: cluster(EYE_OFFSET_X, EYE_OFFSET_Y),
        mouth: vec![
            place(-12.0, MOUTH_OFFSET_Y),
            place(0.0, MOUTH_OFFSET_Y + 4.0),
            place(12.0, MOUTH_OFFSET_Y),
        ],
    }
}
