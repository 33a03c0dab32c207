use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Thresholds for the sip aggregator. Validated on load and on every update;
/// out-of-range values are rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatorConfig {
    /// Minimum per-frame confidence for a frame to qualify.
    pub confidence_threshold: f64,

    /// Minimum head tilt magnitude (degrees).
    pub head_tilt_threshold_deg: f64,

    /// Maximum hand-to-face distance (pixels).
    pub hand_face_distance_threshold_px: f64,

    /// Episode must last at least this long to confirm (inclusive).
    pub sip_duration_min_s: f64,

    /// Episodes reaching this age unconfirmed are discarded (exclusive bound).
    pub sip_duration_max_s: f64,

    /// Quiet period after a confirmation, measured from confirmation time.
    pub cooldown_s: f64,

    /// Consecutive non-qualifying frames tolerated inside a candidate.
    pub consecutive_miss_grace: u32,

    /// Require `motion_score > 0` for a frame to qualify.
    pub motion_detection_enabled: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            head_tilt_threshold_deg: 25.0,
            hand_face_distance_threshold_px: 100.0,
            sip_duration_min_s: 0.8,
            sip_duration_max_s: 3.5,
            cooldown_s: 1.0,
            consecutive_miss_grace: 5,
            motion_detection_enabled: false,
        }
    }
}

const MAX_EPISODE_SECS: f64 = 60.0;
const MAX_COOLDOWN_SECS: f64 = 600.0;
const MAX_MISS_GRACE: u32 = 300;

impl AggregatorConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        check_range(
            "confidence_threshold",
            self.confidence_threshold,
            0.0,
            1.0,
        )?;
        check_range(
            "head_tilt_threshold_deg",
            self.head_tilt_threshold_deg,
            0.0,
            90.0,
        )?;

        if !(self.hand_face_distance_threshold_px.is_finite()
            && self.hand_face_distance_threshold_px > 0.0)
        {
            return Err(TrackerError::validation(format!(
                "hand_face_distance_threshold_px must be positive, got {}",
                self.hand_face_distance_threshold_px
            )));
        }

        if !(self.sip_duration_min_s.is_finite() && self.sip_duration_min_s > 0.0) {
            return Err(TrackerError::validation(format!(
                "sip_duration_min_s must be positive, got {}",
                self.sip_duration_min_s
            )));
        }
        check_range(
            "sip_duration_max_s",
            self.sip_duration_max_s,
            0.0,
            MAX_EPISODE_SECS,
        )?;
        if self.sip_duration_max_s <= self.sip_duration_min_s {
            return Err(TrackerError::validation(format!(
                "sip_duration_max_s ({}) must exceed sip_duration_min_s ({})",
                self.sip_duration_max_s, self.sip_duration_min_s
            )));
        }

        check_range("cooldown_s", self.cooldown_s, 0.0, MAX_COOLDOWN_SECS)?;

        if self.consecutive_miss_grace > MAX_MISS_GRACE {
            return Err(TrackerError::validation(format!(
                "consecutive_miss_grace must be at most {MAX_MISS_GRACE}, got {}",
                self.consecutive_miss_grace
            )));
        }

        Ok(())
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> TrackerResult<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(TrackerError::validation(format!(
            "{field} must be within [{min}, {max}], got {value}"
        )))
    }
}
