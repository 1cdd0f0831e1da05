use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::{IntakeLog, LogKey, Medication, MedicationChanges, NewMedication};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MedicationFilter {
    pub user_id: String,
    /// Only medications whose start date's calendar day is on or before this date.
    pub started_on_or_before: Option<NaiveDate>,
}

impl MedicationFilter {
    #[must_use]
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            started_on_or_before: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFilter {
    pub user_id: String,
    /// Only logs recorded for exactly this calendar date.
    pub date: Option<NaiveDate>,
}

impl LogFilter {
    #[must_use]
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: None,
        }
    }
}

/// A write against the `medications` resource. Updates and deletes are scoped to the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum MedicationWrite {
    Insert(NewMedication),
    Update {
        id: String,
        user_id: String,
        changes: MedicationChanges,
    },
    Delete {
        id: String,
        user_id: String,
    },
}

/// Contract of the remote data store. Implementations own no cached state.
///
/// `SqliteStore` implements it locally; the CLI also has an HTTP implementation.
/// Medications come back newest-created first, logs newest-created first.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn query_medications(&self, filter: &MedicationFilter) -> Result<Vec<Medication>>;

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<IntakeLog>>;

    /// Returns the stored record for inserts and updates, `None` for deletes.
    async fn write_medication(&self, op: &MedicationWrite) -> Result<Option<Medication>>;

    /// Insert `log`, or overwrite the record sharing `conflict` with it.
    async fn upsert_log(&self, log: &IntakeLog, conflict: &LogKey) -> Result<IntakeLog>;

    /// Store `bytes` at `path` and return a URL that dereferences to them.
    async fn upload_photo(&self, bytes: &[u8], path: &str) -> Result<String>;
}
