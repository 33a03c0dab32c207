pub mod cup_profiles;
pub mod sip_events;
