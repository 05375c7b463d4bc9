use crate::driver::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Type '{0}' is not registered for change tracking")]
    UntrackedType(String),

    #[error("Entity '{type_name}' with identity {id} is already attached to this context")]
    AlreadyAttached { type_name: String, id: String },

    #[error("Invalid tracking metadata: {0}")]
    InvalidMetadata(String),

    #[error("`{field}` field cannot be modified")]
    IdentityMutated { field: String },

    #[error("Entity of type '{type_name}' must have an `{field}` field")]
    MissingIdentity { type_name: String, field: String },

    #[error("Document must contain a non-negative integer `{field}` field")]
    InvalidVersion { field: String },

    #[error("The same document cannot be updated multiple times within one context: {namespace} {id}")]
    DuplicateDocument { namespace: String, id: String },

    #[error("Optimistic concurrency conflict: {conflicts} item(s) not matched by id+version")]
    ConcurrencyConflict { conflicts: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Save was cancelled")]
    Cancelled,

    #[error("Lock error: {0}")]
    Lock(String),
}

impl TrackError {
    /// Number of unmatched writes when this is an optimistic-lock conflict.
    pub fn conflict_count(&self) -> Option<u64> {
        match self {
            Self::ConcurrencyConflict { conflicts } => Some(*conflicts),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

impl<T> From<std::sync::PoisonError<T>> for TrackError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_count() {
        let err = TrackError::ConcurrencyConflict { conflicts: 3 };
        assert_eq!(err.conflict_count(), Some(3));
        assert!(err.is_conflict());
        assert!(err.to_string().contains("3 item(s)"));

        let err = TrackError::Cancelled;
        assert_eq!(err.conflict_count(), None);
    }

    #[test]
    fn test_driver_error_conversion() {
        let err: TrackError = DriverError::ConnectionLost("reset".into()).into();
        assert!(matches!(err, TrackError::Driver(DriverError::ConnectionLost(_))));
    }
}
