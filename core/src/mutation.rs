use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{KeyPredicate, QueryCache, Resource};
use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::models::{
    IntakeLog, Medication, MedicationChanges, NewIntakeLog, NewMedication, PhotoAttachment,
    photo_path, validate_changes, validate_new_medication,
};
use crate::store::{MedicationWrite, RemoteStore};

/// One domain write.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    InsertMedication(NewMedication),
    UpdateMedication {
        id: String,
        user_id: String,
        changes: MedicationChanges,
    },
    DeleteMedication {
        id: String,
        user_id: String,
    },
    UpsertLog(NewIntakeLog),
}

impl Operation {
    #[must_use]
    pub fn owner(&self) -> &str {
        match self {
            Operation::InsertMedication(med) => &med.user_id,
            Operation::UpdateMedication { user_id, .. }
            | Operation::DeleteMedication { user_id, .. } => user_id,
            Operation::UpsertLog(log) => &log.user_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::InsertMedication(_) => "insert medication",
            Operation::UpdateMedication { .. } => "update medication",
            Operation::DeleteMedication { .. } => "delete medication",
            Operation::UpsertLog(_) => "upsert intake log",
        }
    }

    /// The cache entries this write can make stale: every query over the
    /// written resource for the same owner.
    #[must_use]
    pub fn invalidations(&self) -> Vec<KeyPredicate> {
        let resource = match self {
            Operation::UpsertLog(_) => Resource::MedicationLogs,
            _ => Resource::Medications,
        };
        vec![KeyPredicate::Owner(resource, self.owner().to_string())]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Medication(Medication),
    Deleted { id: String },
    Log(IntakeLog),
}

/// Runs writes against the store and invalidates the cache once the store
/// has acknowledged them. Holds no state of its own.
#[derive(Clone)]
pub struct MutationExecutor {
    store: Arc<dyn RemoteStore>,
    cache: QueryCache,
    clock: Arc<dyn Clock>,
}

impl MutationExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, cache: QueryCache, clock: Arc<dyn Clock>) -> Self {
        Self { store, cache, clock }
    }

    /// Apply `op`, then invalidate every key matching `invalidates`. On
    /// failure nothing is invalidated.
    pub async fn execute(
        &self,
        op: Operation,
        invalidates: &[KeyPredicate],
    ) -> Result<MutationOutcome> {
        let kind = op.kind();
        let outcome = match self.apply(op).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(operation = kind, error = %e, "write failed");
                return Err(e);
            }
        };
        let refetches: usize = invalidates.iter().map(|p| self.cache.invalidate(p)).sum();
        info!(operation = kind, refetches, "write acknowledged");
        Ok(outcome)
    }

    /// [`execute`](Self::execute) with the operation's own invalidations.
    pub async fn run(&self, op: Operation) -> Result<MutationOutcome> {
        let invalidates = op.invalidations();
        self.execute(op, &invalidates).await
    }

    async fn apply(&self, op: Operation) -> Result<MutationOutcome> {
        match op {
            Operation::InsertMedication(med) => {
                validate_new_medication(&med)?;
                let stored = self
                    .store
                    .write_medication(&MedicationWrite::Insert(med))
                    .await?
                    .ok_or_else(|| {
                        TrackerError::transport("store returned no medication for insert")
                    })?;
                Ok(MutationOutcome::Medication(stored))
            }
            Operation::UpdateMedication {
                id,
                user_id,
                changes,
            } => {
                validate_changes(&changes)?;
                let stored = self
                    .store
                    .write_medication(&MedicationWrite::Update {
                        id,
                        user_id,
                        changes,
                    })
                    .await?
                    .ok_or_else(|| {
                        TrackerError::transport("store returned no medication for update")
                    })?;
                Ok(MutationOutcome::Medication(stored))
            }
            Operation::DeleteMedication { id, user_id } => {
                self.store
                    .write_medication(&MedicationWrite::Delete {
                        id: id.clone(),
                        user_id,
                    })
                    .await?;
                Ok(MutationOutcome::Deleted { id })
            }
            Operation::UpsertLog(new) => self.upsert_log(new).await.map(MutationOutcome::Log),
        }
    }

    /// Upload the photo first, if any; the log is only written with the URL
    /// the upload returned.
    async fn upsert_log(&self, new: NewIntakeLog) -> Result<IntakeLog> {
        if new.medication_id.trim().is_empty() {
            return Err(TrackerError::validation("medication_id must not be empty"));
        }
        if new.user_id.trim().is_empty() {
            return Err(TrackerError::validation("user_id must not be empty"));
        }
        let conflict = new.conflict_key();
        let now = self.clock.now();

        let photo_url = match new.photo {
            None => None,
            Some(PhotoAttachment::Existing(url)) => Some(url),
            Some(PhotoAttachment::Upload(photo)) => {
                if photo.bytes.is_empty() {
                    return Err(TrackerError::validation("photo is empty"));
                }
                let path = photo_path(&new.user_id, &new.medication_id, now, &photo.file_name);
                let url = self
                    .store
                    .upload_photo(&photo.bytes, &path)
                    .await
                    .map_err(|e| match e {
                        TrackerError::Upload(_) => e,
                        other => TrackerError::Upload(other.to_string()),
                    })?;
                Some(url)
            }
        };

        let log = IntakeLog {
            medication_id: new.medication_id,
            user_id: new.user_id,
            date: new.date,
            photo_url,
            created_at: now,
        };
        self.store.upsert_log(&log, &conflict).await
    }
}
