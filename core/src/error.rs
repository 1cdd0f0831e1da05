use thiserror::Error;

/// Every failure the core can report. All of them are recoverable at the
/// level of the single operation that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Network or remote failure on a fetch or write.
    #[error("Remote store unavailable: {0}")]
    Transport(String),

    /// Rejected before any remote call was made.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A write violated a store constraint other than the declared conflict key.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// Photo upload failed; the dependent log write was not attempted.
    #[error("Photo upload failed: {0}")]
    Upload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not signed in")]
    NoSession,
}

impl TrackerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(err.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(err.to_string()),
            _ => Self::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT NOT NULL CHECK (length(v) > 1))")
            .unwrap();
        let err = conn.execute("INSERT INTO t (v) VALUES ('x')", []).unwrap_err();
        assert!(matches!(TrackerError::from(err), TrackerError::Conflict(_)));
    }

    #[test]
    fn test_other_sqlite_errors_map_to_transport() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing_table", []).unwrap_err();
        assert!(matches!(TrackerError::from(err), TrackerError::Transport(_)));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(TrackerError::NoSession.to_string(), "Not signed in");
        assert_eq!(
            TrackerError::validation("name is required").to_string(),
            "Invalid input: name is required"
        );
    }
}
