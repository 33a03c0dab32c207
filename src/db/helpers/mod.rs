use std::{convert::TryFrom, num::NonZeroU32};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::db::models::SipSource;

/// Fixed-width RFC 3339 so string comparison in SQL orders chronologically.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_source(value: &str) -> Result<SipSource> {
    match value {
        "auto" => Ok(SipSource::Auto),
        "manual" => Ok(SipSource::Manual),
        other => Err(anyhow!("unknown sip source {other}")),
    }
}

pub fn to_nonzero(value: i64, field: &str) -> Result<NonZeroU32> {
    u32::try_from(value)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| anyhow!("{field} contains invalid value {value}"))
}

/// Half-open UTC range `[start of date, start of next date)`.
pub fn day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid start of day for {date}"))?
        .and_utc();
    let next = date
        .succ_opt()
        .ok_or_else(|| anyhow!("date {date} has no successor"))?;
    let end = next
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid start of day for {next}"))?
        .and_utc();
    Ok((start, end))
}
