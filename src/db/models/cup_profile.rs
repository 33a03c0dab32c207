//! Cup profile data models.
//!
//! A profile describes one drinking vessel: how much it holds and how many
//! sips it usually takes to empty. Sip events point at profiles by id only.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CupProfile {
    pub id: i64,
    pub name: String,
    pub size_ml: NonZeroU32,
    pub sips_per_cup: NonZeroU32,
    pub color: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input data for creating or updating a cup profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CupProfileInput {
    pub name: String,
    pub size_ml: u32,
    pub sips_per_cup: u32,
    pub color: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl CupProfileInput {
    pub fn new(name: impl Into<String>, size_ml: u32, sips_per_cup: u32) -> Self {
        Self {
            name: name.into(),
            size_ml,
            sips_per_cup,
            color: None,
            is_default: false,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Validation rules for cup profile input
pub mod validation {
    use super::CupProfileInput;
    use crate::error::{TrackerError, TrackerResult};

    const MAX_NAME_CHARS: usize = 50;
    const MAX_SIZE_ML: u32 = 2000;
    const MAX_SIPS_PER_CUP: u32 = 100;

    pub fn validate_name(name: &str) -> TrackerResult<()> {
        let count = name.trim().chars().count();
        if count == 0 || count > MAX_NAME_CHARS {
            return Err(TrackerError::validation(format!(
                "Profile name must be 1-{MAX_NAME_CHARS} characters"
            )));
        }
        Ok(())
    }

    pub fn validate_size_ml(size_ml: u32) -> TrackerResult<()> {
        if size_ml == 0 || size_ml > MAX_SIZE_ML {
            return Err(TrackerError::validation(format!(
                "size_ml must be between 1 and {MAX_SIZE_ML}, got {size_ml}"
            )));
        }
        Ok(())
    }

    pub fn validate_sips_per_cup(sips: u32) -> TrackerResult<()> {
        if sips == 0 || sips > MAX_SIPS_PER_CUP {
            return Err(TrackerError::validation(format!(
                "sips_per_cup must be between 1 and {MAX_SIPS_PER_CUP}, got {sips}"
            )));
        }
        Ok(())
    }

    pub fn validate_color(color: &str) -> TrackerResult<()> {
        let Some(hex_part) = color.strip_prefix('#') else {
            return Err(TrackerError::validation(
                "Invalid color format. Must be hex (#RRGGBB)",
            ));
        };

        if hex_part.len() != 6 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrackerError::validation(
                "Invalid color format. Must be hex (#RRGGBB)",
            ));
        }

        Ok(())
    }

    pub fn validate_input(input: &CupProfileInput) -> TrackerResult<()> {
        validate_name(&input.name)?;
        validate_size_ml(input.size_ml)?;
        validate_sips_per_cup(input.sips_per_cup)?;
        if let Some(color) = &input.color {
            validate_color(color)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validation::*;
    use super::*;

    #[test]
    fn accepts_reasonable_profile() {
        let input = CupProfileInput::new("Office mug", 300, 8).with_color("#ff00AA");
        assert!(validate_input(&input).is_ok());
    }

    #[test]
    fn rejects_zero_size_and_sips() {
        assert!(validate_input(&CupProfileInput::new("Mug", 0, 10)).is_err());
        assert!(validate_input(&CupProfileInput::new("Mug", 250, 0)).is_err());
    }

    #[test]
    fn rejects_bad_names_and_colors() {
        assert!(validate_input(&CupProfileInput::new("   ", 250, 10)).is_err());
        assert!(validate_input(&CupProfileInput::new("x".repeat(51), 250, 10)).is_err());
        assert!(validate_color("ff0000").is_err());
        assert!(validate_color("#ff00").is_err());
        assert!(validate_color("#gg0000").is_err());
    }
}
