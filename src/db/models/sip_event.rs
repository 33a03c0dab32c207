//! Sip event data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SipSource {
    Auto,
    Manual,
}

impl SipSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipSource::Auto => "auto",
            SipSource::Manual => "manual",
        }
    }
}

/// Episode details kept alongside automatically detected sips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SipDetectionData {
    pub duration_ms: i64,
    pub qualifying_frames: u32,
    pub missed_frames: u32,
    pub detector: Option<String>,
    /// Detection run that produced the sip.
    pub session_id: Option<String>,
}

/// A persisted sip. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SipEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub profile_id: i64,
    pub ml_estimate: f64,
    pub source: SipSource,
    /// Present for automatically detected sips only.
    pub confidence: Option<f64>,
    pub detection_data: Option<SipDetectionData>,
}

/// A sip event that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSipEvent {
    pub timestamp: DateTime<Utc>,
    pub profile_id: i64,
    pub ml_estimate: f64,
    pub source: SipSource,
    pub confidence: Option<f64>,
    pub detection_data: Option<SipDetectionData>,
}

impl NewSipEvent {
    pub fn into_event(self, id: i64) -> SipEvent {
        SipEvent {
            id,
            timestamp: self.timestamp,
            profile_id: self.profile_id,
            ml_estimate: self.ml_estimate,
            source: self.source,
            confidence: self.confidence,
            detection_data: self.detection_data,
        }
    }
}
