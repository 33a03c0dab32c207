pub mod controller;
pub mod events;
pub mod queue;
pub mod stats;

pub use controller::SipTracker;
pub use events::TrackerEvent;
pub use queue::{PendingSip, SipQueue};
pub use stats::{DailyStats, DateGuard, StatsCache, WeeklyStats};
