use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, TrackerError};
use crate::models::{IntakeLog, Medication};
use crate::store::{LogFilter, MedicationFilter, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Medications,
    MedicationLogs,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Medications => write!(f, "medications"),
            Resource::MedicationLogs => write!(f, "medication_logs"),
        }
    }
}

/// Identifies one cached query result: resource kind, owner, and an optional
/// date discriminator.
///
/// A dated medications key holds the medications started on or before that
/// date; a dated logs key holds the logs recorded for exactly that date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueryKey {
    pub resource: Resource,
    pub owner: String,
    pub date: Option<NaiveDate>,
}

impl QueryKey {
    #[must_use]
    pub fn medications(owner: &str) -> Self {
        Self {
            resource: Resource::Medications,
            owner: owner.to_string(),
            date: None,
        }
    }

    #[must_use]
    pub fn medications_on(owner: &str, date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::medications(owner)
        }
    }

    #[must_use]
    pub fn logs(owner: &str) -> Self {
        Self {
            resource: Resource::MedicationLogs,
            owner: owner.to_string(),
            date: None,
        }
    }

    #[must_use]
    pub fn logs_on(owner: &str, date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::logs(owner)
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date {
            Some(date) => write!(f, "[{}, {}, {date}]", self.resource, self.owner),
            None => write!(f, "[{}, {}]", self.resource, self.owner),
        }
    }
}

/// Selects cache entries for invalidation. `Resource` and `Owner` match
/// every key sharing that prefix, dated or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPredicate {
    Exact(QueryKey),
    Resource(Resource),
    Owner(Resource, String),
}

impl KeyPredicate {
    #[must_use]
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPredicate::Exact(k) => k == key,
            KeyPredicate::Resource(r) => *r == key.resource,
            KeyPredicate::Owner(r, owner) => *r == key.resource && *owner == key.owner,
        }
    }
}

/// Immutable snapshot returned by the store for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Medications(Arc<Vec<Medication>>),
    Logs(Arc<Vec<IntakeLog>>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Freshness {
    #[default]
    Absent,
    Loading,
    Fresh,
    StaleRefetching,
    /// Last fetch failed. Any earlier value is kept alongside.
    Error(TrackerError),
}

impl Freshness {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Freshness::Fresh | Freshness::Error(_))
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        matches!(self, Freshness::Loading | Freshness::StaleRefetching)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Absent => "absent",
            Freshness::Loading => "loading",
            Freshness::Fresh => "fresh",
            Freshness::StaleRefetching => "stale-refetching",
            Freshness::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery<T> {
    pub key: QueryKey,
    pub data: Option<T>,
    pub freshness: Freshness,
}

impl<T> CachedQuery<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> CachedQuery<U> {
        CachedQuery {
            key: self.key,
            data: self.data.and_then(f),
            freshness: self.freshness,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&TrackerError> {
        match &self.freshness {
            Freshness::Error(e) => Some(e),
            _ => None,
        }
    }

    /// The cached value, or the fetch error when there is nothing to show.
    pub fn into_result(self) -> Result<T> {
        match (self.data, self.freshness) {
            (Some(data), _) => Ok(data),
            (None, Freshness::Error(e)) => Err(e),
            (None, freshness) => Err(TrackerError::transport(format!(
                "no data for {} ({})",
                self.key,
                freshness.label()
            ))),
        }
    }
}

impl CachedQuery<QueryData> {
    #[must_use]
    pub fn into_medications(self) -> CachedQuery<Arc<Vec<Medication>>> {
        self.map(|data| match data {
            QueryData::Medications(meds) => Some(meds),
            QueryData::Logs(_) => None,
        })
    }

    #[must_use]
    pub fn into_logs(self) -> CachedQuery<Arc<Vec<IntakeLog>>> {
        self.map(|data| match data {
            QueryData::Logs(logs) => Some(logs),
            QueryData::Medications(_) => None,
        })
    }
}

type Callback = Arc<dyn Fn(&CachedQuery<QueryData>) + Send + Sync>;

#[derive(Default)]
struct Entry {
    data: Option<QueryData>,
    freshness: Freshness,
    /// The in-flight fetch has already sent its request to the store.
    requested: bool,
    /// Invalidated after the in-flight request was sent; fetch again when it lands.
    refetch_pending: bool,
}

#[derive(Default)]
struct State {
    entries: HashMap<QueryKey, Entry>,
    subscribers: HashMap<QueryKey, Vec<(u64, Callback)>>,
    next_subscription: u64,
    /// Bumped by `clear`; fetches started under an older epoch are dropped.
    epoch: u64,
}

impl State {
    fn snapshot(&self, key: &QueryKey) -> CachedQuery<QueryData> {
        match self.entries.get(key) {
            Some(entry) => CachedQuery {
                key: key.clone(),
                data: entry.data.clone(),
                freshness: entry.freshness.clone(),
            },
            None => CachedQuery {
                key: key.clone(),
                data: None,
                freshness: Freshness::Absent,
            },
        }
    }

    fn pending_notification(&self, key: &QueryKey) -> Option<Notification> {
        let callbacks: Vec<Callback> = self
            .subscribers
            .get(key)?
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        if callbacks.is_empty() {
            return None;
        }
        Some(Notification {
            snapshot: self.snapshot(key),
            callbacks,
        })
    }
}

/// Callbacks collected under the lock and run after it is released.
struct Notification {
    snapshot: CachedQuery<QueryData>,
    callbacks: Vec<Callback>,
}

impl Notification {
    fn deliver(self) {
        for cb in &self.callbacks {
            cb(&self.snapshot);
        }
    }
}

fn deliver_all(notifications: Vec<Notification>) {
    for n in notifications {
        n.deliver();
    }
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    state: Mutex<State>,
    /// Ticks on every state change so `fetch` can wait for settlement.
    changed: watch::Sender<u64>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.changed.send_modify(|tick| *tick = tick.wrapping_add(1));
    }
}

/// Keyed cache of store query results, one per signed-in session and shared
/// by cloning.
///
/// Reads never block: [`QueryCache::get`] hands back whatever is cached and
/// starts a background fetch when nothing is. Fetches run as tasks on the
/// current Tokio runtime and are de-duplicated per key. Observers register
/// with [`QueryCache::subscribe`] and are told about every change of value or
/// freshness for their key.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(State::default()),
                changed,
            }),
        }
    }

    /// Current entry for `key` without side effects.
    #[must_use]
    pub fn peek(&self, key: &QueryKey) -> CachedQuery<QueryData> {
        self.inner.lock().snapshot(key)
    }

    /// Current entry for `key`. Starts a fetch when the key has never been
    /// loaded. An entry in the error state is returned as is.
    ///
    /// Must be called from within a Tokio runtime for the fetch to start.
    #[must_use]
    pub fn get(&self, key: &QueryKey) -> CachedQuery<QueryData> {
        let (snapshot, notification) = {
            let mut state = self.inner.lock();
            let absent = state
                .entries
                .get(key)
                .is_none_or(|e| e.freshness == Freshness::Absent);
            let notification = if absent && start_fetch(&self.inner, &mut state, key) {
                state.pending_notification(key)
            } else {
                None
            };
            (state.snapshot(key), notification)
        };
        if let Some(n) = notification {
            self.inner.bump();
            n.deliver();
        }
        snapshot
    }

    /// Mark matching entries stale and refetch them. Keys that were never
    /// loaded are left alone. An entry already being fetched is not fetched
    /// twice: if its request has not reached the store yet that fetch will see
    /// the change, otherwise one more fetch runs when it lands.
    ///
    /// Returns the number of refetches scheduled, deferred ones included.
    pub fn invalidate(&self, predicate: &KeyPredicate) -> usize {
        let (scheduled, notifications) = {
            let mut state = self.inner.lock();
            let mut idle = Vec::new();
            let mut deferred = 0;
            for (key, entry) in &mut state.entries {
                if !predicate.matches(key) {
                    continue;
                }
                match entry.freshness {
                    Freshness::Fresh | Freshness::Error(_) => idle.push(key.clone()),
                    Freshness::Loading | Freshness::StaleRefetching
                        if entry.requested && !entry.refetch_pending =>
                    {
                        entry.refetch_pending = true;
                        deferred += 1;
                    }
                    _ => {}
                }
            }
            let mut notifications = Vec::new();
            let mut started = 0;
            for key in &idle {
                if start_fetch(&self.inner, &mut state, key) {
                    started += 1;
                    notifications.extend(state.pending_notification(key));
                }
            }
            (started + deferred, notifications)
        };
        debug!(?predicate, scheduled, "invalidated cache entries");
        self.inner.bump();
        deliver_all(notifications);
        scheduled
    }

    /// Register `callback` for every change to `key`'s entry. The
    /// registration lasts until the returned handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&CachedQuery<QueryData>) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            cache: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Wait until `key` has a settled entry (fresh, or failed) and return it,
    /// starting a fetch if needed.
    pub async fn fetch(&self, key: &QueryKey) -> CachedQuery<QueryData> {
        loop {
            let mut changed = {
                let mut state = self.inner.lock();
                let current = state.snapshot(key);
                if current.freshness.is_settled() {
                    return current;
                }
                if current.freshness == Freshness::Absent
                    && !start_fetch(&self.inner, &mut state, key)
                {
                    return CachedQuery {
                        freshness: Freshness::Error(TrackerError::transport(
                            "no async runtime to fetch on",
                        )),
                        ..current
                    };
                }
                self.inner.changed.subscribe()
            };
            if changed.changed().await.is_err() {
                return self.peek(key);
            }
        }
    }

    /// Explicit retry: refetch `key` even if it is fresh or failed, and wait
    /// for the result.
    pub async fn refetch(&self, key: &QueryKey) -> CachedQuery<QueryData> {
        self.invalidate(&KeyPredicate::Exact(key.clone()));
        self.fetch(key).await
    }

    /// Drop every entry. Fetches still in flight are discarded when they land.
    pub fn clear(&self) {
        let notifications = {
            let mut state = self.inner.lock();
            state.epoch += 1;
            let keys: Vec<QueryKey> = state.entries.drain().map(|(k, _)| k).collect();
            keys.iter()
                .filter_map(|k| state.pending_notification(k))
                .collect::<Vec<_>>()
        };
        debug!("cache cleared");
        self.inner.bump();
        deliver_all(notifications);
    }
}

/// Move `key` to loading (or stale-refetching when it holds data) and spawn
/// its fetch. Caller holds the lock.
fn start_fetch(inner: &Arc<Inner>, state: &mut State, key: &QueryKey) -> bool {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(%key, "no Tokio runtime, fetch not started");
        return false;
    };
    let entry = state.entries.entry(key.clone()).or_default();
    entry.freshness = if entry.data.is_some() {
        Freshness::StaleRefetching
    } else {
        Freshness::Loading
    };
    entry.requested = false;
    entry.refetch_pending = false;
    let epoch = state.epoch;
    runtime.spawn(run_fetch(Arc::clone(inner), key.clone(), epoch));
    true
}

async fn run_fetch(inner: Arc<Inner>, key: QueryKey, epoch: u64) {
    {
        let mut state = inner.lock();
        if state.epoch != epoch {
            return;
        }
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.requested = true;
        }
    }
    debug!(%key, "fetching");
    let result = match key.resource {
        Resource::Medications => {
            let filter = MedicationFilter {
                user_id: key.owner.clone(),
                started_on_or_before: key.date,
            };
            inner
                .store
                .query_medications(&filter)
                .await
                .map(|meds| QueryData::Medications(Arc::new(meds)))
        }
        Resource::MedicationLogs => {
            let filter = LogFilter {
                user_id: key.owner.clone(),
                date: key.date,
            };
            inner
                .store
                .query_logs(&filter)
                .await
                .map(|logs| QueryData::Logs(Arc::new(logs)))
        }
    };

    let notification = {
        let mut state = inner.lock();
        if state.epoch != epoch {
            debug!(%key, "discarding fetch from before cache clear");
            return;
        }
        let entry = state.entries.entry(key.clone()).or_default();
        let refetch = entry.refetch_pending;
        match result {
            Ok(data) => {
                debug!(%key, "fetch complete");
                entry.data = Some(data);
                entry.freshness = Freshness::Fresh;
            }
            Err(e) => {
                warn!(%key, error = %e, "fetch failed");
                entry.freshness = Freshness::Error(e);
            }
        }
        if refetch {
            debug!(%key, "invalidated while fetching, fetching again");
            start_fetch(&inner, &mut state, &key);
        }
        state.pending_notification(&key)
    };
    inner.bump();
    if let Some(n) = notification {
        n.deliver();
    }
}

/// Handle for a cache subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cache: Weak<Inner>,
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(subs) = state.subscribers.get_mut(&self.key) {
            subs.retain(|(id, _)| *id != self.id);
            if subs.is_empty() {
                state.subscribers.remove(&self.key);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}
