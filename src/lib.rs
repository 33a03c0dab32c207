pub mod db;
pub mod detection;
pub mod error;
pub mod export;
pub mod sensing;
pub mod settings;
pub mod sip;
pub mod tracker;
mod utils;

use std::{path::Path, sync::Arc};

use anyhow::Result;

pub use db::Database;
pub use detection::{DetectionSignal, Detector, DetectorKind, Frame};
pub use error::{TrackerError, TrackerResult};
pub use sensing::DetectionController;
pub use settings::SettingsStore;
pub use sip::{AggregatorConfig, CupConverter, SipAggregator};
pub use tracker::{DailyStats, SipTracker, TrackerEvent, WeeklyStats};

pub const DATABASE_FILE: &str = "count_cups.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Shared handles for one data directory.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub tracker: SipTracker,
}

impl AppState {
    /// Open (or create) the database and settings under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);
        let tracker = SipTracker::new(db.clone(), Arc::clone(&settings))?;

        Ok(Self {
            db,
            settings,
            tracker,
        })
    }
}

/// Initialize logging (reads RUST_LOG, defaults to info).
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}
