use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::{IntakeLog, LogKey, Medication, MedicationChanges, NewMedication};
use crate::store::{LogFilter, MedicationFilter, MedicationWrite, RemoteStore};

/// URL scheme of photos held by [`SqliteStore`].
pub const LOCAL_PHOTO_PREFIX: &str = "medtrack-local://photos/";

const MEDICATION_COLUMNS: &str =
    "id, user_id, name, dosage, frequency, start_date, end_date, created_at";
const LOG_COLUMNS: &str = "medication_id, user_id, date, photo_url, created_at";

/// SQLite-backed implementation of the store contract, used when no remote
/// store is configured and as the store behind the core's tests.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            TrackerError::transport(format!("Failed to open database {}: {e}", path.display()))
        })?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS medications (
                    id TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL,
                    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
                    dosage TEXT NOT NULL DEFAULT '',
                    frequency TEXT NOT NULL DEFAULT '',
                    start_date TEXT NOT NULL,
                    end_date TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS medication_logs (
                    medication_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    photo_url TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE (medication_id, user_id, date)
                );

                CREATE INDEX IF NOT EXISTS idx_medications_user ON medications(user_id);
                CREATE INDEX IF NOT EXISTS idx_medication_logs_user_date ON medication_logs(user_id, date);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS photos (
                    path TEXT PRIMARY KEY NOT NULL,
                    bytes BLOB NOT NULL,
                    created_at TEXT NOT NULL
                );

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn medication_from_row(row: &rusqlite::Row) -> rusqlite::Result<Medication> {
        Ok(Medication {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            dosage: row.get(3)?,
            frequency: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn log_from_row(row: &rusqlite::Row) -> rusqlite::Result<IntakeLog> {
        Ok(IntakeLog {
            medication_id: row.get(0)?,
            user_id: row.get(1)?,
            date: row.get(2)?,
            photo_url: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    // --- Medications ---

    pub fn medications(&self, filter: &MedicationFilter) -> Result<Vec<Medication>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications
             WHERE user_id = ?1 AND (?2 IS NULL OR date(start_date) <= ?2)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let meds = stmt
            .query_map(
                params![filter.user_id, filter.started_on_or_before],
                Self::medication_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(meds)
    }

    fn get_medication(conn: &Connection, id: &str, user_id: &str) -> Result<Option<Medication>> {
        let med = conn
            .query_row(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::medication_from_row,
            )
            .optional()?;
        Ok(med)
    }

    pub fn insert_medication(&self, med: &NewMedication) -> Result<Medication> {
        let start_date = med
            .start_date
            .ok_or_else(|| TrackerError::validation("start_date is required"))?;
        let id = Uuid::new_v4().to_string();
        let now = Local::now().naive_local();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO medications (id, user_id, name, dosage, frequency, start_date, end_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                med.user_id,
                med.name,
                med.dosage,
                med.frequency,
                start_date,
                med.end_date,
                now
            ],
        )?;
        Self::get_medication(&conn, &id, &med.user_id)?
            .ok_or_else(|| TrackerError::transport("Medication not found after insert"))
    }

    pub fn update_medication(
        &self,
        id: &str,
        user_id: &str,
        changes: &MedicationChanges,
    ) -> Result<Medication> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE medications SET
                name = COALESCE(?3, name),
                dosage = COALESCE(?4, dosage),
                frequency = COALESCE(?5, frequency),
                end_date = CASE WHEN ?6 THEN ?7 ELSE end_date END
             WHERE id = ?1 AND user_id = ?2",
            params![
                id,
                user_id,
                changes.name,
                changes.dosage,
                changes.frequency,
                changes.end_date.is_some(),
                changes.end_date.flatten()
            ],
        )?;
        if rows == 0 {
            return Err(TrackerError::NotFound(format!("medication {id}")));
        }
        Self::get_medication(&conn, id, user_id)?
            .ok_or_else(|| TrackerError::NotFound(format!("medication {id}")))
    }

    pub fn delete_medication(&self, id: &str, user_id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "DELETE FROM medications WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            return Err(TrackerError::NotFound(format!("medication {id}")));
        }
        Ok(())
    }

    // --- Intake logs ---

    pub fn logs(&self, filter: &LogFilter) -> Result<Vec<IntakeLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM medication_logs
             WHERE user_id = ?1 AND (?2 IS NULL OR date = ?2)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let logs = stmt
            .query_map(params![filter.user_id, filter.date], Self::log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    pub fn upsert_log(&self, log: &IntakeLog, conflict: &LogKey) -> Result<IntakeLog> {
        if !conflict.matches(log) {
            return Err(TrackerError::Conflict(format!(
                "log for medication {} on {} does not match its conflict key",
                log.medication_id, log.date
            )));
        }
        let conn = self.conn();
        conn.execute(
            "INSERT INTO medication_logs (medication_id, user_id, date, photo_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(medication_id, user_id, date) DO UPDATE SET
                photo_url = excluded.photo_url,
                created_at = excluded.created_at",
            params![
                log.medication_id,
                log.user_id,
                log.date,
                log.photo_url,
                log.created_at
            ],
        )?;
        conn.query_row(
            &format!(
                "SELECT {LOG_COLUMNS} FROM medication_logs
                 WHERE medication_id = ?1 AND user_id = ?2 AND date = ?3"
            ),
            params![conflict.medication_id, conflict.user_id, conflict.date],
            Self::log_from_row,
        )
        .map_err(TrackerError::from)
    }

    // --- Photos ---

    pub fn store_photo(&self, bytes: &[u8], path: &str) -> Result<String> {
        if path.trim().is_empty() || path.starts_with('/') {
            return Err(TrackerError::Upload(format!("invalid object path '{path}'")));
        }
        let now: NaiveDateTime = Local::now().naive_local();
        self.conn()
            .execute(
                "INSERT INTO photos (path, bytes, created_at) VALUES (?1, ?2, ?3)",
                params![path, bytes, now],
            )
            .map_err(|e| match TrackerError::from(e) {
                TrackerError::Conflict(_) => {
                    TrackerError::Upload(format!("object already exists at '{path}'"))
                }
                other => TrackerError::Upload(other.to_string()),
            })?;
        Ok(format!("{LOCAL_PHOTO_PREFIX}{path}"))
    }

    /// Read back a stored photo by its path or by the URL returned from the upload.
    pub fn photo(&self, path_or_url: &str) -> Result<Option<Vec<u8>>> {
        let path = path_or_url
            .strip_prefix(LOCAL_PHOTO_PREFIX)
            .unwrap_or(path_or_url);
        let bytes = self
            .conn()
            .query_row(
                "SELECT bytes FROM photos WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes)
    }

    #[cfg(test)]
    pub fn count_logs_on(&self, user_id: &str, date: chrono::NaiveDate) -> Result<i64> {
        let n = self.conn().query_row(
            "SELECT COUNT(*) FROM medication_logs WHERE user_id = ?1 AND date = ?2",
            params![user_id, date],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn query_medications(&self, filter: &MedicationFilter) -> Result<Vec<Medication>> {
        self.medications(filter)
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<IntakeLog>> {
        self.logs(filter)
    }

    async fn write_medication(&self, op: &MedicationWrite) -> Result<Option<Medication>> {
        match op {
            MedicationWrite::Insert(med) => self.insert_medication(med).map(Some),
            MedicationWrite::Update {
                id,
                user_id,
                changes,
            } => self.update_medication(id, user_id, changes).map(Some),
            MedicationWrite::Delete { id, user_id } => {
                self.delete_medication(id, user_id).map(|()| None)
            }
        }
    }

    async fn upsert_log(&self, log: &IntakeLog, conflict: &LogKey) -> Result<IntakeLog> {
        SqliteStore::upsert_log(self, log, conflict)
    }

    async fn upload_photo(&self, bytes: &[u8], path: &str) -> Result<String> {
        self.store_photo(bytes, path)
    }
}
