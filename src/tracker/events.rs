use chrono::NaiveDate;
use serde::Serialize;

use crate::db::models::SipEvent;

/// Notifications published by the tracker. Subscribers that lag behind lose
/// the oldest messages; statistics can always be re-read on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    SipRecorded { event: SipEvent },
    StatsInvalidated { date: NaiveDate },
    /// A confirmed sip that could not be stored.
    SipDropped { reason: String },
}
