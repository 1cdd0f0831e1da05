use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::watch;

use crate::db::SqliteStore;
use crate::error::{Result, TrackerError};
use crate::models::{IntakeLog, LogKey, Medication, NewMedication, parse_wall_time};
use crate::store::{LogFilter, MedicationFilter, MedicationWrite, RemoteStore};

/// Store double shared by the unit tests: a real in-memory `SqliteStore`
/// with call counters, switchable failures and a gate that can hold reads
/// in flight after they have queried the database.
pub struct MockStore {
    pub inner: SqliteStore,
    reads_open: watch::Sender<bool>,
    pub medication_fetches: AtomicUsize,
    pub log_fetches: AtomicUsize,
    pub writes: AtomicUsize,
    pub uploads: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_uploads: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            reads_open: watch::channel(true).0,
            medication_fetches: AtomicUsize::new(0),
            log_fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn medication_fetches(&self) -> usize {
        self.medication_fetches.load(Ordering::SeqCst)
    }

    pub fn log_fetches(&self) -> usize {
        self.log_fetches.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Reads issued from now on query the database, then wait for
    /// [`MockStore::release_reads`] before returning.
    pub fn hold_reads(&self) {
        self.reads_open.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.reads_open.send_replace(true);
    }

    async fn read_gate(&self) {
        let mut open = self.reads_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    /// Insert a medication directly, bypassing the counters.
    pub fn seed_medication(&self, user: &str, name: &str, start: &str) -> Medication {
        self.inner
            .insert_medication(&NewMedication {
                user_id: user.to_string(),
                name: name.to_string(),
                dosage: "10mg".to_string(),
                frequency: "once daily".to_string(),
                start_date: parse_wall_time(start),
                end_date: None,
            })
            .unwrap()
    }

    /// Insert a log directly, bypassing the counters.
    pub fn seed_log(&self, user: &str, medication_id: &str, day: NaiveDate) -> IntakeLog {
        let log = IntakeLog {
            medication_id: medication_id.to_string(),
            user_id: user.to_string(),
            date: day,
            photo_url: None,
            created_at: noon(day),
        };
        self.inner.upsert_log(&log, &log.key()).unwrap()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(TrackerError::transport(format!("{what} failed")));
        }
        Ok(())
    }
}

/// Yield to spawned tasks until `done` holds.
pub async fn yield_until(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached after 100 yields");
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn noon(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(12, 0, 0).unwrap()
}

#[async_trait]
impl RemoteStore for MockStore {
    async fn query_medications(&self, filter: &MedicationFilter) -> Result<Vec<Medication>> {
        self.medication_fetches.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_reads, "query medications")?;
        let meds = self.inner.medications(filter);
        self.read_gate().await;
        meds
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<IntakeLog>> {
        self.log_fetches.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_reads, "query logs")?;
        let logs = self.inner.logs(filter);
        self.read_gate().await;
        logs
    }

    async fn write_medication(&self, op: &MedicationWrite) -> Result<Option<Medication>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_writes, "write medication")?;
        self.inner.write_medication(op).await
    }

    async fn upsert_log(&self, log: &IntakeLog, conflict: &LogKey) -> Result<IntakeLog> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_writes, "upsert log")?;
        // Let concurrent callers reach the store before this write lands.
        tokio::task::yield_now().await;
        self.inner.upsert_log(log, conflict)
    }

    async fn upload_photo(&self, bytes: &[u8], path: &str) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(TrackerError::Upload("bucket unavailable".to_string()));
        }
        self.inner.store_photo(bytes, path)
    }
}
