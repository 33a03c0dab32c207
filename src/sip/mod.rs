pub mod aggregator;
pub mod config;
pub mod converter;

pub use aggregator::{AggregatorPhase, AggregatorState, ConfirmedSip, SipAggregator};
pub use config::AggregatorConfig;
pub use converter::CupConverter;
