//! Error taxonomy for the sip tracking core.

/// Top-level error type returned by tracker, database and settings operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Malformed cup profile or out-of-range configuration.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Persistence failure reported by the database worker.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Aggregator fed with out-of-order or otherwise impossible timing.
    #[error("State error: {message}")]
    State { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    pub fn profile_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "cup profile",
            id,
        }
    }

    pub fn sip_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "sip event",
            id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<anyhow::Error> for TrackerError {
    fn from(err: anyhow::Error) -> Self {
        // Database tasks raise typed errors through anyhow; keep them intact.
        match err.downcast::<TrackerError>() {
            Ok(typed) => typed,
            Err(other) => Self::storage(format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_wrapping_preserves_typed_errors() {
        let err: TrackerError = anyhow::Error::new(TrackerError::profile_not_found(7)).into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "cup profile 7 not found");
    }

    #[test]
    fn untyped_anyhow_becomes_storage_error() {
        let err: TrackerError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, TrackerError::Storage { .. }));
    }
}
