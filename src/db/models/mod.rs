pub mod cup_profile;
pub mod sip_event;

pub use cup_profile::{CupProfile, CupProfileInput};
pub use sip_event::{NewSipEvent, SipDetectionData, SipEvent, SipSource};
