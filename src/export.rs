//! JSON export of history for a date range.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{
        helpers::day_bounds,
        models::{CupProfile, SipEvent},
    },
    error::{TrackerError, TrackerResult},
    tracker::{DailyStats, SipTracker},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Longest range accepted by a single export.
const MAX_EXPORT_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total_days: u32,
    pub total_sips: u64,
    pub total_ml: f64,
    pub goal_achieved_days: u32,
    pub goal_achievement_rate: f64,
    pub average_daily_ml: f64,
    pub average_daily_sips: f64,
}

impl ExportSummary {
    fn from_days(days: &[DailyStats]) -> Self {
        let total_days = days.len() as u32;
        let total_sips: u64 = days.iter().map(|day| day.total_sips).sum();
        let total_ml: f64 = days.iter().map(|day| day.total_ml).sum();
        let goal_achieved_days = days.iter().filter(|day| day.goal_achieved).count() as u32;

        let per_day = |value: f64| {
            if total_days > 0 {
                value / f64::from(total_days)
            } else {
                0.0
            }
        };

        Self {
            total_days,
            total_sips,
            total_ml,
            goal_achieved_days,
            goal_achievement_rate: per_day(f64::from(goal_achieved_days)) * 100.0,
            average_daily_ml: per_day(total_ml),
            average_daily_sips: per_day(total_sips as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub exported_at: DateTime<Utc>,
    /// Inclusive range of UTC days.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cup_profiles: Vec<CupProfile>,
    pub sip_events: Vec<SipEvent>,
    pub daily_stats: Vec<DailyStats>,
    pub summary: ExportSummary,
}

/// Collect profiles, events and per-day statistics for `start..=end`.
pub async fn collect_export(
    tracker: &SipTracker,
    start: NaiveDate,
    end: NaiveDate,
) -> TrackerResult<ExportData> {
    if end < start {
        return Err(TrackerError::validation(format!(
            "export range ends ({end}) before it starts ({start})"
        )));
    }
    let days = (end - start).num_days() + 1;
    if days > MAX_EXPORT_DAYS {
        return Err(TrackerError::validation(format!(
            "export range of {days} days exceeds {MAX_EXPORT_DAYS}"
        )));
    }

    let db = tracker.database();
    let (range_start, _) = day_bounds(start)?;
    let (_, range_end) = day_bounds(end)?;

    let cup_profiles = db.list_cup_profiles().await?;
    let sip_events = db.query_sip_events(range_start, range_end).await?;

    let mut daily_stats = Vec::with_capacity(days as usize);
    for offset in 0..days {
        daily_stats.push(tracker.get_daily_stats(start + Duration::days(offset)).await?);
    }

    Ok(ExportData {
        exported_at: Utc::now(),
        start_date: start,
        end_date: end,
        summary: ExportSummary::from_days(&daily_stats),
        cup_profiles,
        sip_events,
        daily_stats,
    })
}

pub fn write_export(path: &Path, data: &ExportData) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create export directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write export to {}", path.display()))?;

    log_info!(
        "exported {} sip events ({} to {}) to {}",
        data.sip_events.len(),
        data.start_date,
        data.end_date,
        path.display()
    );
    Ok(())
}

pub fn read_export(path: &Path) -> Result<ExportData> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read export from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse export in {}", path.display()))
}
