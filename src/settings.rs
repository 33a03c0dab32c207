use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{detection::DetectorKind, error::TrackerError, sip::AggregatorConfig};

const DEFAULT_DAILY_GOAL_ML: u32 = 2000;
const MAX_DAILY_GOAL_ML: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub aggregator: AggregatorConfig,
    pub detector: DetectorKind,
    /// Profile used for automatic sips when none is selected explicitly.
    pub default_cup_profile_id: Option<i64>,
    pub daily_goal_ml: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            detector: DetectorKind::default(),
            default_cup_profile_id: None,
            daily_goal_ml: DEFAULT_DAILY_GOAL_ML,
        }
    }
}

impl UserSettings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        self.aggregator.validate()?;
        if self.daily_goal_ml == 0 || self.daily_goal_ml > MAX_DAILY_GOAL_ML {
            return Err(TrackerError::validation(format!(
                "daily_goal_ml must be between 1 and {MAX_DAILY_GOAL_ML}, got {}",
                self.daily_goal_ml
            )));
        }
        Ok(())
    }
}

/// JSON-backed user settings.
///
/// Values are validated whenever they enter the store. A settings file that
/// fails to parse or validate is an error, not a silent fallback to defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        self.read().aggregator.clone()
    }

    pub fn detector(&self) -> DetectorKind {
        self.read().detector
    }

    pub fn default_cup_profile_id(&self) -> Option<i64> {
        self.read().default_cup_profile_id
    }

    pub fn daily_goal_ml(&self) -> u32 {
        self.read().daily_goal_ml
    }

    pub fn update_aggregator(&self, config: AggregatorConfig) -> Result<()> {
        self.update(|settings| settings.aggregator = config)
    }

    pub fn update_detector(&self, detector: DetectorKind) -> Result<()> {
        self.update(|settings| settings.detector = detector)
    }

    pub fn update_default_cup_profile(&self, profile_id: Option<i64>) -> Result<()> {
        self.update(|settings| settings.default_cup_profile_id = profile_id)
    }

    pub fn update_daily_goal(&self, goal_ml: u32) -> Result<()> {
        self.update(|settings| settings.daily_goal_ml = goal_ml)
    }

    /// Apply `change` to a copy, validate it, write it to disk, then publish it.
    /// Nothing changes in memory if validation or the write fails.
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    /// Re-read the file from disk. On failure the current values stay in place.
    pub fn reload(&self) -> Result<UserSettings> {
        let data = read_settings(&self.path)?;
        let mut guard = self.write();
        *guard = data.clone();
        Ok(data)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn read_settings(path: &Path) -> Result<UserSettings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let data: UserSettings = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
    data.validate()?;
    Ok(data)
}
