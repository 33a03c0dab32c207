pub mod controller;
pub mod demo_feed;
mod loop_worker;

pub use controller::DetectionController;
pub use demo_feed::{DemoFeed, DemoPhase};
