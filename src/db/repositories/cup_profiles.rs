use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, to_nonzero},
        models::{cup_profile::validation, CupProfile, CupProfileInput},
    },
    error::TrackerError,
};

const PROFILE_COLUMNS: &str =
    "id, name, size_ml, sips_per_cup, color, is_default, created_at, updated_at";

fn row_to_profile(row: &Row) -> Result<CupProfile> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(CupProfile {
        id: row.get("id")?,
        name: row.get("name")?,
        size_ml: to_nonzero(row.get("size_ml")?, "size_ml")?,
        sips_per_cup: to_nonzero(row.get("sips_per_cup")?, "sips_per_cup")?,
        color: row.get("color")?,
        is_default: row.get::<_, i64>("is_default")? != 0,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn select_profile(conn: &Connection, profile_id: i64) -> Result<Option<CupProfile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROFILE_COLUMNS} FROM cup_profiles WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![profile_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_profile(row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Create a cup profile. Marking it default clears the flag on every other
    /// profile in the same transaction.
    pub async fn create_cup_profile(&self, input: CupProfileInput) -> Result<CupProfile> {
        validation::validate_input(&input)?;

        self.execute(move |conn| {
            let now = format_datetime(&Utc::now());
            let tx = conn.transaction()?;

            if input.is_default {
                tx.execute("UPDATE cup_profiles SET is_default = 0 WHERE is_default = 1", [])?;
            }

            tx.execute(
                "INSERT INTO cup_profiles (name, size_ml, sips_per_cup, color, is_default, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    input.name.trim(),
                    input.size_ml,
                    input.sips_per_cup,
                    input.color,
                    input.is_default,
                    now,
                    now,
                ],
            )?;
            let profile_id = tx.last_insert_rowid();

            let profile = select_profile(&tx, profile_id)?
                .ok_or_else(|| anyhow!("Cup profile not found after insert"))?;
            tx.commit()?;

            Ok(profile)
        })
        .await
    }

    pub async fn get_cup_profile(&self, profile_id: i64) -> Result<Option<CupProfile>> {
        self.execute(move |conn| select_profile(conn, profile_id))
            .await
    }

    /// All profiles, default first, then by name.
    pub async fn list_cup_profiles(&self) -> Result<Vec<CupProfile>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM cup_profiles
                 ORDER BY is_default DESC, name COLLATE NOCASE ASC, id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut profiles = Vec::new();
            while let Some(row) = rows.next()? {
                profiles.push(row_to_profile(row)?);
            }

            Ok(profiles)
        })
        .await
    }

    pub async fn get_default_cup_profile(&self) -> Result<Option<CupProfile>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM cup_profiles WHERE is_default = 1 LIMIT 1"
            ))?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn update_cup_profile(
        &self,
        profile_id: i64,
        input: CupProfileInput,
    ) -> Result<CupProfile> {
        validation::validate_input(&input)?;

        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM cup_profiles WHERE id = ?1",
                    params![profile_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(TrackerError::profile_not_found(profile_id).into());
            }

            if input.is_default {
                tx.execute(
                    "UPDATE cup_profiles SET is_default = 0 WHERE is_default = 1 AND id != ?1",
                    params![profile_id],
                )?;
            }

            tx.execute(
                "UPDATE cup_profiles
                 SET name = ?1, size_ml = ?2, sips_per_cup = ?3, color = ?4,
                     is_default = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    input.name.trim(),
                    input.size_ml,
                    input.sips_per_cup,
                    input.color,
                    input.is_default,
                    format_datetime(&Utc::now()),
                    profile_id,
                ],
            )?;

            let profile = select_profile(&tx, profile_id)?
                .ok_or_else(|| anyhow!("Cup profile not found after update"))?;
            tx.commit()?;

            Ok(profile)
        })
        .await
    }

    /// Delete a profile. Existing sip events keep their `profile_id`.
    pub async fn delete_cup_profile(&self, profile_id: i64) -> Result<()> {
        self.execute(move |conn| {
            let affected = conn.execute(
                "DELETE FROM cup_profiles WHERE id = ?1",
                params![profile_id],
            )?;
            if affected == 0 {
                return Err(TrackerError::profile_not_found(profile_id).into());
            }
            Ok(())
        })
        .await
    }
}
