use crate::db::models::CupProfile;

/// Stateless volume arithmetic keyed by a cup profile.
///
/// `CupProfile` stores its size and sip count as `NonZeroU32`, so none of these
/// divisions can hit zero.
pub struct CupConverter;

impl CupConverter {
    /// Volume attributed to a single sip.
    pub fn estimate_sip_ml(profile: &CupProfile) -> f64 {
        f64::from(profile.size_ml.get()) / f64::from(profile.sips_per_cup.get())
    }

    pub fn cup_ml(profile: &CupProfile) -> f64 {
        f64::from(profile.size_ml.get())
    }

    pub fn sips_to_cups(sips: u64, profile: &CupProfile) -> f64 {
        sips as f64 / f64::from(profile.sips_per_cup.get())
    }

    pub fn ml_to_cups(ml: f64, profile: &CupProfile) -> f64 {
        ml / f64::from(profile.size_ml.get())
    }

    pub fn cups_to_ml(cups: f64, profile: &CupProfile) -> f64 {
        cups * f64::from(profile.size_ml.get())
    }
}
