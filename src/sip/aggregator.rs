use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionSignal;
use crate::error::{TrackerError, TrackerResult};

use super::config::AggregatorConfig;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AggregatorPhase {
    Idle,
    Candidate,
    Cooldown,
}

impl Default for AggregatorPhase {
    fn default() -> Self {
        AggregatorPhase::Idle
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorState {
    pub phase: AggregatorPhase,
    pub onset_time: Option<DateTime<Utc>>,
    pub last_qualifying_time: Option<DateTime<Utc>>,
    pub max_confidence_seen: f64,
    pub consecutive_miss_count: u32,
    pub qualifying_frames: u32,
    /// Misses across the whole candidate, not reset by qualifying frames.
    pub total_miss_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Timestamp of the last frame accepted, used to reject out-of-order input.
    pub last_frame_time: Option<DateTime<Utc>>,
}

impl AggregatorState {
    fn begin_candidate(&mut self, now: DateTime<Utc>, confidence: f64) {
        self.phase = AggregatorPhase::Candidate;
        self.onset_time = Some(now);
        self.last_qualifying_time = Some(now);
        self.max_confidence_seen = confidence;
        self.consecutive_miss_count = 0;
        self.qualifying_frames = 1;
        self.total_miss_count = 0;
    }

    fn clear_candidate(&mut self) {
        self.onset_time = None;
        self.last_qualifying_time = None;
        self.max_confidence_seen = 0.0;
        self.consecutive_miss_count = 0;
        self.qualifying_frames = 0;
        self.total_miss_count = 0;
    }

    fn discard(&mut self) {
        self.clear_candidate();
        self.phase = AggregatorPhase::Idle;
    }

    fn enter_cooldown(&mut self, until: DateTime<Utc>) {
        self.clear_candidate();
        self.phase = AggregatorPhase::Cooldown;
        self.cooldown_until = Some(until);
    }
}

/// A sip confirmed by the aggregator, before volume attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedSip {
    /// Onset of the episode.
    pub timestamp: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
    /// Highest per-frame confidence seen during the episode.
    pub confidence: f64,
    pub duration_ms: i64,
    pub qualifying_frames: u32,
    pub missed_frames: u32,
}

/// Hysteresis state machine turning per-frame signals into confirmed sips.
///
/// Must see every frame in timestamp order, including frames where nothing was
/// detected. Pauses in the frame stream must be followed by [`SipAggregator::reset`].
#[derive(Debug)]
pub struct SipAggregator {
    config: AggregatorConfig,
    min_duration: Duration,
    max_duration: Duration,
    cooldown: Duration,
    state: AggregatorState,
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

impl SipAggregator {
    pub fn new(config: AggregatorConfig) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            min_duration: secs_to_duration(config.sip_duration_min_s),
            max_duration: secs_to_duration(config.sip_duration_max_s),
            cooldown: secs_to_duration(config.cooldown_s),
            config,
            state: AggregatorState::default(),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn state(&self) -> &AggregatorState {
        &self.state
    }

    pub fn phase(&self) -> AggregatorPhase {
        self.state.phase
    }

    /// Replace the thresholds. Any in-flight candidate or cooldown is dropped,
    /// since it was judged against the old values.
    pub fn update_config(&mut self, config: AggregatorConfig) -> TrackerResult<()> {
        *self = Self::new(config)?;
        Ok(())
    }

    /// Return to Idle, discarding any candidate, cooldown and frame clock.
    pub fn reset(&mut self) {
        if self.state.phase == AggregatorPhase::Candidate {
            log_debug!("discarding in-flight sip candidate on reset");
        }
        self.state = AggregatorState::default();
    }

    pub fn qualifies(&self, signal: &DetectionSignal) -> bool {
        let motion_ok = !self.config.motion_detection_enabled
            || signal.motion_score.map(|score| score > 0.0).unwrap_or(false);

        signal.face_detected
            && signal.hand_detected
            && signal.confidence >= self.config.confidence_threshold
            && signal.head_tilt_deg >= self.config.head_tilt_threshold_deg
            && signal.hand_face_distance_px <= self.config.hand_face_distance_threshold_px
            && motion_ok
    }

    /// Feed one frame. Timing errors reset the machine and yield `None`; they
    /// never reach the capture loop.
    pub fn process_detection(
        &mut self,
        signal: &DetectionSignal,
        now: DateTime<Utc>,
    ) -> Option<ConfirmedSip> {
        match self.step(signal, now) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                log_warn!("{err}; resetting sip aggregator");
                self.reset();
                None
            }
        }
    }

    fn step(
        &mut self,
        signal: &DetectionSignal,
        now: DateTime<Utc>,
    ) -> TrackerResult<Option<ConfirmedSip>> {
        if let Some(last) = self.state.last_frame_time {
            if now < last {
                return Err(TrackerError::state(format!(
                    "frame at {} arrived after frame at {}",
                    now.to_rfc3339(),
                    last.to_rfc3339()
                )));
            }
        }
        self.state.last_frame_time = Some(now);

        if self.state.phase == AggregatorPhase::Cooldown {
            match self.state.cooldown_until {
                Some(until) if now < until => return Ok(None),
                _ => {
                    self.state.phase = AggregatorPhase::Idle;
                    self.state.cooldown_until = None;
                }
            }
        }

        let qualifies = self.qualifies(signal);

        match self.state.phase {
            AggregatorPhase::Idle => {
                if qualifies {
                    log_debug!("sip candidate started at {}", now.to_rfc3339());
                    self.state.begin_candidate(now, signal.confidence);
                }
                Ok(None)
            }
            AggregatorPhase::Candidate => self.advance_candidate(qualifies, signal.confidence, now),
            AggregatorPhase::Cooldown => Ok(None),
        }
    }

    fn advance_candidate(
        &mut self,
        qualifies: bool,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> TrackerResult<Option<ConfirmedSip>> {
        let onset = self
            .state
            .onset_time
            .ok_or_else(|| TrackerError::state("candidate phase without onset time"))?;
        let elapsed = now - onset;

        if qualifies {
            self.state.last_qualifying_time = Some(now);
            self.state.max_confidence_seen = self.state.max_confidence_seen.max(confidence);
            self.state.consecutive_miss_count = 0;
            self.state.qualifying_frames += 1;
        } else {
            self.state.consecutive_miss_count += 1;
            self.state.total_miss_count += 1;
            if self.state.consecutive_miss_count > self.config.consecutive_miss_grace {
                log_debug!(
                    "sip candidate dropped after {} missed frames",
                    self.state.consecutive_miss_count
                );
                self.state.discard();
                return Ok(None);
            }
        }

        if elapsed >= self.max_duration {
            log_debug!(
                "sip candidate exceeded max duration ({}ms)",
                elapsed.num_milliseconds()
            );
            self.state.discard();
            return Ok(None);
        }

        if qualifies && elapsed >= self.min_duration {
            let confirmed = ConfirmedSip {
                timestamp: onset,
                confirmed_at: now,
                confidence: self.state.max_confidence_seen,
                duration_ms: elapsed.num_milliseconds(),
                qualifying_frames: self.state.qualifying_frames,
                missed_frames: self.state.total_miss_count,
            };
            self.state.enter_cooldown(now + self.cooldown);
            log_debug!(
                "sip confirmed: onset={}, confidence={:.2}",
                onset.to_rfc3339(),
                confirmed.confidence
            );
            return Ok(Some(confirmed));
        }

        Ok(None)
    }
}
