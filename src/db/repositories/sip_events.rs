use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, parse_source},
        models::{NewSipEvent, SipDetectionData, SipEvent},
    },
    error::TrackerError,
};

fn row_to_sip_event(row: &Row) -> Result<SipEvent> {
    let timestamp: String = row.get("timestamp")?;
    let source: String = row.get("source")?;
    let detection_data: Option<String> = row.get("detection_data")?;

    let detection_data = detection_data
        .map(|raw| serde_json::from_str::<SipDetectionData>(&raw))
        .transpose()
        .context("failed to decode detection_data")?;

    Ok(SipEvent {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        profile_id: row.get("profile_id")?,
        ml_estimate: row.get("ml_estimate")?,
        source: parse_source(&source)?,
        confidence: row.get("confidence")?,
        detection_data,
    })
}

impl Database {
    /// Append a sip event and return its id. The insert is a single statement,
    /// so a failure leaves no partial row behind.
    pub async fn insert_sip_event(&self, event: NewSipEvent) -> Result<i64> {
        if !event.ml_estimate.is_finite() || event.ml_estimate < 0.0 {
            return Err(TrackerError::validation(format!(
                "ml_estimate must be a non-negative number, got {}",
                event.ml_estimate
            ))
            .into());
        }

        self.execute(move |conn| {
            let detection_data = event
                .detection_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to encode detection_data")?;

            conn.execute(
                "INSERT INTO sip_events (timestamp, profile_id, ml_estimate, source, confidence, detection_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    format_datetime(&event.timestamp),
                    event.profile_id,
                    event.ml_estimate,
                    event.source.as_str(),
                    event.confidence,
                    detection_data,
                    format_datetime(&Utc::now()),
                ],
            )
            .with_context(|| "failed to insert sip event")?;

            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Events with `start <= timestamp < end`, oldest first.
    pub async fn query_sip_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SipEvent>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, profile_id, ml_estimate, source, confidence, detection_data
                 FROM sip_events
                 WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![format_datetime(&start), format_datetime(&end)])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_sip_event(row)?);
            }

            Ok(events)
        })
        .await
    }

    /// Delete a sip event, returning the removed row so callers can
    /// invalidate the affected day.
    pub async fn delete_sip_event(&self, sip_id: i64) -> Result<SipEvent> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let event = {
                let mut stmt = tx.prepare(
                    "SELECT id, timestamp, profile_id, ml_estimate, source, confidence, detection_data
                     FROM sip_events WHERE id = ?1",
                )?;
                let mut rows = stmt.query(params![sip_id])?;
                match rows.next()? {
                    Some(row) => row_to_sip_event(row)?,
                    None => return Err(TrackerError::sip_not_found(sip_id).into()),
                }
            };

            tx.execute("DELETE FROM sip_events WHERE id = ?1", params![sip_id])?;
            tx.commit()?;

            Ok(event)
        })
        .await
    }
}
