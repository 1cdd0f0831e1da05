use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::cache::{CachedQuery, QueryCache, QueryKey};
use crate::clock::Clock;
use crate::dashboard::{
    CaretakerDashboard, CaretakerQueries, PatientDashboard, PatientQueries,
};
use crate::error::{Result, TrackerError};
use crate::metrics::{self, CalendarDay};
use crate::models::{
    IntakeLog, Medication, MedicationChanges, NewIntakeLog, NewMedication, PhotoAttachment,
    PhotoPolicy, PhotoUpload,
};
use crate::mutation::{MutationExecutor, MutationOutcome, Operation};
use crate::store::RemoteStore;

/// Fields of a medication as entered by the user; the owner comes from the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MedicationDraft {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDate>,
}

/// Session-scoped entry point: one cache, one executor, one signed-in user.
///
/// Every read and write needs a session; without one the cache stays empty
/// and calls fail with [`TrackerError::NoSession`].
pub struct MedTracker {
    cache: QueryCache,
    executor: MutationExecutor,
    clock: Arc<dyn Clock>,
    photo_policy: PhotoPolicy,
    session: Mutex<Option<String>>,
}

impl MedTracker {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        photo_policy: PhotoPolicy,
    ) -> Self {
        let cache = QueryCache::new(Arc::clone(&store));
        let executor = MutationExecutor::new(store, cache.clone(), Arc::clone(&clock));
        Self {
            cache,
            executor,
            clock,
            photo_policy,
            session: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn photo_policy(&self) -> PhotoPolicy {
        self.photo_policy
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    // --- Session ---

    pub fn sign_in(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(TrackerError::validation("user id must not be empty"));
        }
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(user_id.to_string());
        if previous.as_deref() != Some(user_id) {
            self.cache.clear();
            info!(user_id, "signed in");
        }
        Ok(())
    }

    pub fn sign_out(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!("signed out");
        }
        self.cache.clear();
    }

    pub fn user_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_user(&self) -> Result<String> {
        self.user_id().ok_or(TrackerError::NoSession)
    }

    // --- Reads ---

    pub async fn medications(&self) -> Result<Vec<Medication>> {
        let user = self.require_user()?;
        let meds = self
            .cache
            .fetch(&QueryKey::medications(&user))
            .await
            .into_medications()
            .into_result()?;
        Ok(meds.as_ref().clone())
    }

    pub async fn logs(&self) -> Result<Vec<IntakeLog>> {
        let user = self.require_user()?;
        let logs = self
            .cache
            .fetch(&QueryKey::logs(&user))
            .await
            .into_logs()
            .into_result()?;
        Ok(logs.as_ref().clone())
    }

    /// Look a medication up by id, or by name ignoring case.
    pub async fn find_medication(&self, id_or_name: &str) -> Result<Medication> {
        let meds = self.medications().await?;
        if let Some(m) = meds.iter().find(|m| m.id == id_or_name) {
            return Ok(m.clone());
        }
        let needle = id_or_name.trim().to_lowercase();
        let mut matches = meds.into_iter().filter(|m| m.name.to_lowercase() == needle);
        match (matches.next(), matches.next()) {
            (Some(m), None) => Ok(m),
            (Some(_), Some(_)) => Err(TrackerError::validation(format!(
                "'{id_or_name}' matches more than one medication; use its id"
            ))),
            (None, _) => Err(TrackerError::NotFound(format!("medication '{id_or_name}'"))),
        }
    }

    pub async fn patient_dashboard(&self, selected: Option<NaiveDate>) -> Result<PatientDashboard> {
        let user = self.require_user()?;
        let selected = selected.unwrap_or_else(|| self.clock.today());
        let queries = PatientQueries {
            medications_on_selected: usable(
                self.cache
                    .fetch(&QueryKey::medications_on(&user, selected))
                    .await
                    .into_medications(),
            )?,
            medications: usable(
                self.cache
                    .fetch(&QueryKey::medications(&user))
                    .await
                    .into_medications(),
            )?,
            logs: usable(self.cache.fetch(&QueryKey::logs(&user)).await.into_logs())?,
        };
        Ok(PatientDashboard::compose(self.clock.now(), selected, &queries))
    }

    pub async fn caretaker_dashboard(
        &self,
        selected: Option<NaiveDate>,
    ) -> Result<CaretakerDashboard> {
        let user = self.require_user()?;
        let today = self.clock.today();
        let queries = CaretakerQueries {
            medications: usable(
                self.cache
                    .fetch(&QueryKey::medications(&user))
                    .await
                    .into_medications(),
            )?,
            logs: usable(self.cache.fetch(&QueryKey::logs(&user)).await.into_logs())?,
            logs_today: usable(
                self.cache
                    .fetch(&QueryKey::logs_on(&user, today))
                    .await
                    .into_logs(),
            )?,
        };
        Ok(CaretakerDashboard::compose(
            today,
            selected.unwrap_or(today),
            &queries,
        ))
    }

    pub async fn month_calendar(&self, year: i32, month: u32) -> Result<Vec<CalendarDay>> {
        let user = self.require_user()?;
        let meds = usable(
            self.cache
                .fetch(&QueryKey::medications(&user))
                .await
                .into_medications(),
        )?;
        let logs = usable(self.cache.fetch(&QueryKey::logs(&user)).await.into_logs())?;
        Ok(metrics::month_calendar(
            meds.data.as_ref().map_or(&[][..], |v| v.as_slice()),
            logs.data.as_ref().map_or(&[][..], |v| v.as_slice()),
            year,
            month,
            self.clock.today(),
        ))
    }

    // --- Writes ---

    pub async fn add_medication(&self, draft: MedicationDraft) -> Result<Medication> {
        let user_id = self.require_user()?;
        let op = Operation::InsertMedication(NewMedication {
            user_id,
            name: draft.name.trim().to_string(),
            dosage: draft.dosage.trim().to_string(),
            frequency: draft.frequency.trim().to_string(),
            start_date: draft.start_date,
            end_date: draft.end_date,
        });
        match self.executor.run(op).await? {
            MutationOutcome::Medication(med) => Ok(med),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn update_medication(
        &self,
        id: &str,
        changes: MedicationChanges,
    ) -> Result<Medication> {
        let user_id = self.require_user()?;
        let op = Operation::UpdateMedication {
            id: id.to_string(),
            user_id,
            changes,
        };
        match self.executor.run(op).await? {
            MutationOutcome::Medication(med) => Ok(med),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn delete_medication(&self, id: &str) -> Result<()> {
        let user_id = self.require_user()?;
        self.executor
            .run(Operation::DeleteMedication {
                id: id.to_string(),
                user_id,
            })
            .await?;
        Ok(())
    }

    /// Record today's dose of `medication_id`, uploading `photo` first when given.
    pub async fn mark_taken(
        &self,
        medication_id: &str,
        photo: Option<PhotoUpload>,
    ) -> Result<IntakeLog> {
        let user_id = self.require_user()?;
        if self.photo_policy == PhotoPolicy::Required && photo.is_none() {
            return Err(TrackerError::validation(
                "A photo is required to mark a medication as taken",
            ));
        }
        let op = Operation::UpsertLog(NewIntakeLog {
            medication_id: medication_id.to_string(),
            user_id,
            date: self.clock.today(),
            photo: photo.map(PhotoAttachment::Upload),
        });
        match self.executor.run(op).await? {
            MutationOutcome::Log(log) => Ok(log),
            other => Err(unexpected(&other)),
        }
    }
}

/// A query is usable when it has data to show, even stale data next to an error.
fn usable<T>(query: CachedQuery<T>) -> Result<CachedQuery<T>> {
    match (&query.data, query.error()) {
        (None, Some(e)) => Err(e.clone()),
        _ => Ok(query),
    }
}

fn unexpected(outcome: &MutationOutcome) -> TrackerError {
    TrackerError::transport(format!("unexpected write outcome {outcome:?}"))
}
