use crate::models::{Completion, RecordFilter, RetentionLimits, TrafficRecord};
use crate::storage::session_log::SessionLog;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 512;

/// Change notifications for surfaces that want to reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    Inserted { id: String },
    Completed { id: String },
    Cleared,
}

/// Records in insertion order. Entries are swapped, never edited in place,
/// so a snapshot never sees a half-written record.
#[derive(Default)]
struct Ring {
    records: VecDeque<Arc<TrafficRecord>>,
    index: HashMap<String, u64>,
    total_bytes: usize,
}

impl Ring {
    fn position(&self, id: &str) -> Option<usize> {
        let sequence = *self.index.get(id)?;
        self.records
            .binary_search_by_key(&sequence, |r| r.sequence)
            .ok()
    }

    fn pop_oldest(&mut self) -> Option<Arc<TrafficRecord>> {
        let evicted = self.records.pop_front()?;
        self.index.remove(&evicted.id);
        self.total_bytes = self.total_bytes.saturating_sub(evicted.approx_size());
        Some(evicted)
    }

    /// Evict oldest-first until `incoming` more bytes and one more record fit
    fn make_room(&mut self, limits: &RetentionLimits, incoming: usize) -> usize {
        let mut evicted = 0;
        while !self.records.is_empty()
            && (self.records.len() >= limits.max_records
                || self.total_bytes + incoming > limits.max_bytes)
        {
            self.pop_oldest();
            evicted += 1;
        }
        evicted
    }

    /// Evict oldest-first until the ring is back within limits
    fn shrink_to(&mut self, limits: &RetentionLimits) -> usize {
        let mut evicted = 0;
        while self.records.len() > 1
            && (self.records.len() > limits.max_records || self.total_bytes > limits.max_bytes)
        {
            self.pop_oldest();
            evicted += 1;
        }
        evicted
    }
}

/// Shared catalog of captured records.
///
/// All mutations go through one write lock; queries copy out `Arc`s under a
/// read lock and do their sorting and filtering after releasing it.
pub struct RecordStore {
    ring: RwLock<Ring>,
    limits: RwLock<RetentionLimits>,
    next_sequence: AtomicU64,
    log: Mutex<Option<SessionLog>>,
    events: broadcast::Sender<RecordEvent>,
}

impl RecordStore {
    pub fn new(limits: RetentionLimits) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ring: RwLock::new(Ring::default()),
            limits: RwLock::new(sanitize(limits)),
            next_sequence: AtomicU64::new(1),
            log: Mutex::new(None),
            events,
        }
    }

    /// Add a record. Returns the id it is stored under: a fresh one if the
    /// record had none or its id is already taken.
    pub fn insert(&self, mut record: TrafficRecord) -> String {
        let settled = !record.is_pending();
        let limits = self.limits();

        let record = {
            let mut ring = self.write_ring();
            if record.id.is_empty() || ring.index.contains_key(&record.id) {
                if !record.id.is_empty() {
                    tracing::debug!("Record id {} already stored, assigning a new one", record.id);
                }
                record.id = uuid::Uuid::new_v4().to_string();
            }
            record.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            let size = record.approx_size();
            let evicted = ring.make_room(&limits, size);
            if evicted > 0 {
                tracing::debug!("Evicted {} records to stay within retention limits", evicted);
            }
            let record = Arc::new(record);
            ring.index.insert(record.id.clone(), record.sequence);
            ring.total_bytes += size;
            ring.records.push_back(Arc::clone(&record));
            record
        };

        if settled {
            self.append_to_log(&record);
        }
        let id = record.id.clone();
        let _ = self.events.send(RecordEvent::Inserted { id: id.clone() });
        id
    }

    /// Settle a pending record. Unknown or already settled ids are ignored.
    /// Returns false as well when the settled record was evicted to make room.
    pub fn update(&self, id: &str, completion: Completion, completed_at: i64) -> bool {
        let completed = {
            let mut ring = self.write_ring();
            let Some(pos) = ring.position(id) else {
                tracing::debug!("Ignoring completion for unknown record {}", id);
                return false;
            };
            let mut record = (*ring.records[pos]).clone();
            let old_size = record.approx_size();
            if !record.complete(completion, completed_at) {
                tracing::debug!("Record {} already settled, ignoring completion", id);
                return false;
            }
            ring.total_bytes = ring.total_bytes.saturating_sub(old_size) + record.approx_size();
            let record = Arc::new(record);
            ring.records[pos] = Arc::clone(&record);
            let evicted = ring.shrink_to(&self.limits());
            if evicted > 0 {
                tracing::debug!("Evicted {} records after completion of {}", evicted, id);
            }
            if !ring.index.contains_key(id) {
                tracing::debug!("Record {} evicted on completion, not logging it", id);
                return false;
            }
            record
        };

        self.append_to_log(&completed);
        let _ = self.events.send(RecordEvent::Completed { id: id.to_string() });
        true
    }

    /// Most recent first, ties broken by insertion order
    pub fn query(&self, filter: &RecordFilter) -> RecordSnapshot {
        let mut records: Vec<Arc<TrafficRecord>> = self.read_ring().records.iter().cloned().collect();
        records.sort_by(|a, b| {
            b.request
                .started_at
                .cmp(&a.request.started_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        RecordSnapshot {
            records,
            filter: filter.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrafficRecord>> {
        let ring = self.read_ring();
        ring.position(id).map(|pos| Arc::clone(&ring.records[pos]))
    }

    /// Drop every record and delete the session log. Returns how many records went.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut ring = self.write_ring();
            let removed = ring.records.len();
            *ring = Ring::default();
            removed
        };

        if let Some(log) = self.lock_log().as_mut() {
            if let Err(err) = log.remove() {
                tracing::warn!("Failed to delete session log {:?}: {}", log.path(), err);
            }
        }

        let _ = self.events.send(RecordEvent::Cleared);
        if removed > 0 {
            tracing::info!("Cleared {} records", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read_ring().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.read_ring().total_bytes
    }

    pub fn limits(&self) -> RetentionLimits {
        *self.limits.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change retention; takes effect immediately
    pub fn set_limits(&self, limits: RetentionLimits) {
        let limits = sanitize(limits);
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = limits;
        let evicted = self.write_ring().shrink_to(&limits);
        if evicted > 0 {
            tracing::debug!("Evicted {} records after retention change", evicted);
        }
    }

    /// Start mirroring settled records into `log`, replacing any previous one
    pub fn attach_log(&self, log: SessionLog) {
        tracing::debug!("Mirroring records to {:?}", log.path());
        *self.lock_log() = Some(log);
    }

    pub fn detach_log(&self) -> Option<SessionLog> {
        self.lock_log().take()
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.lock_log().as_ref().map(|log| log.path().to_path_buf())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    fn append_to_log(&self, record: &TrafficRecord) {
        let mut guard = self.lock_log();
        let failed = match guard.as_mut() {
            Some(log) => match log.append(record) {
                Ok(()) => false,
                Err(err) => {
                    tracing::warn!(
                        "Session log write failed, continuing in memory only: {:#}",
                        err
                    );
                    true
                }
            },
            None => false,
        };
        if failed {
            guard.take();
        }
    }

    fn read_ring(&self) -> RwLockReadGuard<'_, Ring> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ring(&self) -> RwLockWriteGuard<'_, Ring> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_log(&self) -> MutexGuard<'_, Option<SessionLog>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sanitize(limits: RetentionLimits) -> RetentionLimits {
    RetentionLimits {
        max_records: limits.max_records.max(1),
        max_bytes: limits.max_bytes.max(1),
    }
}

/// Point-in-time view of the store. Iterating applies the filter lazily and
/// can be repeated; writers are never blocked by it.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    records: Vec<Arc<TrafficRecord>>,
    filter: RecordFilter,
}

impl RecordSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &TrafficRecord> + '_ {
        self.records
            .iter()
            .map(Arc::as_ref)
            .filter(move |record| self.filter.matches(record))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<TrafficRecord> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Headers, RecordState, ResponseFacet};
    use tempfile::tempdir;

    fn record(url: &str, started_at: i64) -> TrafficRecord {
        let mut record = TrafficRecord::new("GET", url, Headers::new());
        record.request.started_at = started_at;
        record
    }

    fn ok_response(status: u16, body: &[u8]) -> Completion {
        Completion::Response(ResponseFacet {
            status_code: status,
            headers: Headers::new(),
            body: Some(body.to_vec()),
        })
    }

    #[test]
    fn retention_cap_evicts_oldest_first() {
        let store = RecordStore::new(RetentionLimits::records(2));
        store.insert(record("https://example.com/1", 1_000));
        store.insert(record("https://example.com/2", 2_000));
        store.insert(record("https://example.com/3", 3_000));

        let urls: Vec<_> = store
            .query(&RecordFilter::default())
            .iter()
            .map(|r| r.request.url.clone())
            .collect();
        assert_eq!(urls, vec!["https://example.com/3", "https://example.com/2"]);
    }

    #[test]
    fn byte_cap_evicts_until_new_record_fits() {
        let limits = RetentionLimits {
            max_records: 100,
            max_bytes: 100,
        };
        let store = RecordStore::new(limits);
        let big = record("https://example.com/big", 1).with_body(Some(vec![b'x'; 60]));
        let big_id = store.insert(big);
        let other = record("https://example.com/other", 2).with_body(Some(vec![b'y'; 60]));
        store.insert(other);

        assert_eq!(store.len(), 1);
        assert!(store.get(&big_id).is_none());
        assert!(store.total_bytes() <= 100);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let store = RecordStore::new(RetentionLimits::default());
        let first = store.insert(record("https://example.com/a", 5_000));
        let second = store.insert(record("https://example.com/b", 5_000));
        let third = store.insert(record("https://example.com/c", 5_000));

        let ids: Vec<_> = store
            .query(&RecordFilter::default())
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[test]
    fn update_settles_exactly_once() {
        let store = RecordStore::new(RetentionLimits::default());
        let id = store.insert(record("https://example.com/a", 1_000));

        assert!(store.update(&id, ok_response(200, b"ok"), 1_040));
        assert!(!store.update(&id, Completion::Failed("late".into()), 1_090));

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.state, RecordState::Completed);
        assert_eq!(stored.status_code(), Some(200));
        assert_eq!(stored.duration_ms, Some(40));
    }

    #[test]
    fn update_for_unknown_id_is_ignored() {
        let store = RecordStore::new(RetentionLimits::default());
        let id = store.insert(record("https://example.com/a", 1_000));
        store.clear();

        assert!(!store.update(&id, ok_response(200, b"ok"), 2_000));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_ids_stay_reachable() {
        let store = RecordStore::new(RetentionLimits::records(2));
        let mut a = record("https://example.com/a", 1);
        a.id = "dup".to_string();
        let mut b = record("https://example.com/b", 2);
        b.id = "dup".to_string();

        let a_id = store.insert(a);
        let b_id = store.insert(b);
        assert_eq!(a_id, "dup");
        assert_ne!(b_id, a_id);

        store.insert(record("https://example.com/c", 3));
        assert!(store.get(&a_id).is_none());
        assert_eq!(store.get(&b_id).unwrap().request.url, "https://example.com/b");
        assert!(store.update(&b_id, ok_response(200, b"ok"), 4));
    }

    #[test]
    fn record_evicted_by_its_own_completion_is_not_reported() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("session_1.log");
        let store = RecordStore::new(RetentionLimits {
            max_records: 100,
            max_bytes: 200,
        });
        store.attach_log(SessionLog::create(&path).unwrap());
        let mut events = store.subscribe();

        let a = store.insert(record("https://e.com/a", 1));
        let b = store.insert(record("https://e.com/b", 2));
        assert!(!store.update(&a, ok_response(200, &[b'x'; 500]), 3));

        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_some());
        assert_eq!(events.try_recv().unwrap(), RecordEvent::Inserted { id: a.clone() });
        assert_eq!(events.try_recv().unwrap(), RecordEvent::Inserted { id: b });
        assert!(events.try_recv().is_err());
        assert!(SessionLog::read_records(&path).unwrap().is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let store = RecordStore::new(RetentionLimits::default());
        store.insert(record("https://example.com/a", 1));

        assert_eq!(store.clear(), 1);
        assert_eq!(store.clear(), 0);
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let store = RecordStore::new(RetentionLimits::default());
        let id = store.insert(record("https://example.com/a", 1));
        let snapshot = store.query(&RecordFilter::default());

        store.update(&id, ok_response(500, b"boom"), 10);
        store.insert(record("https://example.com/b", 2));

        assert_eq!(snapshot.count(), 1);
        assert!(snapshot.iter().all(|r| r.is_pending()));
        // Iterating twice yields the same view.
        assert_eq!(snapshot.to_vec(), snapshot.to_vec());
    }

    #[test]
    fn query_filters_on_url_and_method() {
        let store = RecordStore::new(RetentionLimits::default());
        store.insert(record("https://api.example.com/users", 1));
        store.insert(TrafficRecord::new("DELETE", "https://api.example.com/items/1", Headers::new()));

        assert_eq!(store.query(&RecordFilter::text("USERS")).count(), 1);
        assert_eq!(store.query(&RecordFilter::text("delete")).count(), 1);
        assert_eq!(store.query(&RecordFilter::text("example")).count(), 2);
    }

    #[test]
    fn settled_records_are_mirrored_to_log() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("session_1.log");
        let store = RecordStore::new(RetentionLimits::default());
        store.attach_log(SessionLog::create(&path).unwrap());

        let id = store.insert(record("https://example.com/a", 1));
        assert!(SessionLog::read_records(&path).unwrap().is_empty());
        store.update(&id, ok_response(200, b"ok"), 2);

        let logged = SessionLog::read_records(&path).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].id, id);

        store.clear();
        assert!(!path.exists());
    }

    #[test]
    fn shrinking_limits_evicts_immediately() {
        let store = RecordStore::new(RetentionLimits::default());
        for i in 0..5 {
            store.insert(record(&format!("https://example.com/{i}"), i));
        }
        store.set_limits(RetentionLimits::records(2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.limits().max_records, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_lose_nothing() {
        let store = Arc::new(RecordStore::new(RetentionLimits::default()));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let id = store.insert(record(&format!("https://example.com/{i}"), i));
                store.update(&id, ok_response(200, b""), i + 1)
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let snapshot = store.query(&RecordFilter::default());
        assert_eq!(snapshot.count(), 64);
        let mut ids: Vec<_> = snapshot.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 64);
    }

    #[tokio::test]
    async fn subscribers_see_lifecycle_events() {
        let store = RecordStore::new(RetentionLimits::default());
        let mut events = store.subscribe();

        let id = store.insert(record("https://example.com/a", 1));
        store.update(&id, ok_response(204, b""), 2);
        store.clear();

        assert_eq!(events.recv().await.unwrap(), RecordEvent::Inserted { id: id.clone() });
        assert_eq!(events.recv().await.unwrap(), RecordEvent::Completed { id });
        assert_eq!(events.recv().await.unwrap(), RecordEvent::Cleared);
    }
}
