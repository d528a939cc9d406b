//! Authoritative stores held by a hub.

use bytes::Bytes;
use meshdata_transport::{ServerRequestProcessor, ServerResponseBuilder};
use meshdata_types::{ChangeSet, Schema, StorePath, SEPARATOR};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::listener::Delivery;
use crate::protocol::{self, HubRequest, HubResponse, Snapshot};
use crate::store::{Operation, RecordSet};
use crate::{Result, SharedDataError};

/// Every store hosted by one hub, keyed by path.
pub(crate) struct StoreHost {
    stores: RwLock<HashMap<StorePath, Arc<HostedStore>>>,
    config: HostConfig,
    stopped: AtomicBool,
}

impl StoreHost {
    pub(crate) fn new(config: HostConfig) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            config,
            stopped: AtomicBool::new(false),
        }
    }

    /// Creates a store, failing if the path is taken.
    pub(crate) fn create(&self, path: &StorePath, schema: &Schema) -> Result<Arc<HostedStore>> {
        self.ensure_running()?;
        let mut stores = self.stores.write();
        if stores.contains_key(path) {
            return Err(SharedDataError::AlreadyExist(path.clone()));
        }
        let store = Arc::new(HostedStore::new(path.clone(), schema.clone(), &self.config));
        stores.insert(path.clone(), Arc::clone(&store));
        info!(path = %path, epoch = store.epoch, "Created store");
        Ok(store)
    }

    /// Returns the store at `path`, creating it if needed.
    pub(crate) fn open(&self, path: &StorePath, schema: &Schema) -> Result<Arc<HostedStore>> {
        self.ensure_running()?;
        if let Some(store) = self.stores.read().get(path) {
            return store.check_schema(schema).map(|()| Arc::clone(store));
        }
        match self.create(path, schema) {
            Err(SharedDataError::AlreadyExist(_)) => {
                let store = self.get(path)?;
                store.check_schema(schema)?;
                Ok(store)
            }
            other => other,
        }
    }

    pub(crate) fn get(&self, path: &StorePath) -> Result<Arc<HostedStore>> {
        self.ensure_running()?;
        self.stores
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| SharedDataError::NotFound(path.clone()))
    }

    /// Immediate children of `parent`, including intermediate path levels
    /// that hold no store themselves.
    pub(crate) fn list(&self, parent: &StorePath) -> Vec<StorePath> {
        let stores = self.stores.read();
        let children: BTreeSet<StorePath> = stores
            .keys()
            .filter_map(|path| immediate_child(path, parent))
            .collect();
        children.into_iter().collect()
    }

    /// Answers one protocol request.
    pub(crate) fn handle(&self, request: HubRequest) -> HubResponse {
        let result = match request {
            HubRequest::Create { path, schema } => {
                self.create(&path, &schema).map(|_| HubResponse::Created)
            }
            HubRequest::Open { path, schema } => self
                .open(&path, &schema)
                .map(|store| HubResponse::Snapshot(store.snapshot())),
            HubRequest::Poll {
                path,
                epoch,
                since,
                wait_ms,
            } => self.get(&path).map(|store| {
                let wait = Duration::from_millis(wait_ms).min(self.config.max_poll_wait);
                store.poll(epoch, since, wait)
            }),
            HubRequest::Commit { path, ops } => self
                .get(&path)
                .and_then(|store| store.commit(ops))
                .map(|change_set| HubResponse::Committed { change_set }),
            HubRequest::List { parent } => Ok(HubResponse::Children {
                paths: self.list(&parent),
            }),
        };
        result.unwrap_or_else(|e| {
            debug!(error = %e, "Hub request failed");
            HubResponse::from_error(&e)
        })
    }

    /// Request processor serving this host over a transport listener.
    pub(crate) fn processor(self: &Arc<Self>) -> Arc<dyn ServerRequestProcessor> {
        let host = Arc::clone(self);
        Arc::new(move |request: Bytes, mut response: ServerResponseBuilder| {
            let reply = match protocol::decode_request(&request) {
                Ok(request) => host.handle(request),
                Err(e) => {
                    warn!(error = %e, "Malformed hub request");
                    HubResponse::from_error(&e)
                }
            };
            match protocol::encode_response(&reply) {
                Ok(encoded) => {
                    response.response_stream().extend_from_slice(&encoded);
                    response.complete();
                }
                Err(e) => response.fail(e),
            }
        })
    }

    /// Stops every store and wakes blocked pollers. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for store in self.stores.read().values() {
            store.stop();
        }
        info!("Store host stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SharedDataError::Stopped);
        }
        Ok(())
    }
}

fn immediate_child(path: &StorePath, parent: &StorePath) -> Option<StorePath> {
    let rest = path
        .full_path()
        .strip_prefix(parent.full_path())?
        .strip_prefix(SEPARATOR)?;
    let segment = rest.split(SEPARATOR).next()?;
    parent.child(segment).ok()
}

struct ChangeLog {
    version: u64,
    entries: VecDeque<ChangeSet>,
}

/// One authoritative store.
pub(crate) struct HostedStore {
    path: StorePath,
    schema: Schema,
    epoch: u64,
    capacity: usize,
    records: RwLock<RecordSet>,
    log: Mutex<ChangeLog>,
    changed: Condvar,
    subscribers: Mutex<Vec<(u64, Delivery)>>,
    next_subscriber: AtomicU64,
    stopped: AtomicBool,
}

impl HostedStore {
    fn new(path: StorePath, schema: Schema, config: &HostConfig) -> Self {
        Self {
            path,
            schema,
            epoch: rand::random(),
            capacity: config.log_capacity,
            records: RwLock::new(RecordSet::new()),
            log: Mutex::new(ChangeLog {
                version: 0,
                entries: VecDeque::new(),
            }),
            changed: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn version(&self) -> u64 {
        self.log.lock().version
    }

    fn check_schema(&self, schema: &Schema) -> Result<()> {
        if &self.schema != schema {
            return Err(SharedDataError::SchemaMismatch(self.path.clone()));
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let records = self.records.read();
        Snapshot {
            epoch: self.epoch,
            version: self.log.lock().version,
            records: records.to_records(),
        }
    }

    /// Runs `f` against a consistent view of the records.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Schema, &RecordSet) -> R) -> R {
        let records = self.records.read();
        f(&self.schema, &records)
    }

    /// Builds operations against the current records and applies them
    /// under one write lock.
    pub(crate) fn write_with(
        &self,
        build: impl FnOnce(&Schema, &RecordSet) -> Result<Vec<Operation>>,
    ) -> Result<ChangeSet> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SharedDataError::Stopped);
        }
        let mut records = self.records.write();
        let ops = build(&self.schema, &records)?;
        let changes = records.apply(&self.schema, ops)?;

        let mut log = self.log.lock();
        if changes.is_empty() {
            return Ok(ChangeSet::new(log.version, Vec::new()));
        }
        log.version += 1;
        let change_set = ChangeSet::new(log.version, changes);
        log.entries.push_back(change_set.clone());
        while log.entries.len() > self.capacity {
            log.entries.pop_front();
        }
        self.changed.notify_all();
        drop(log);

        // Still under the records lock, so subscribers see commit order.
        for (_, delivery) in self.subscribers.lock().iter() {
            delivery.event(change_set.clone());
        }
        debug!(path = %self.path, version = change_set.version, changes = change_set.len(), "Committed");
        Ok(change_set)
    }

    pub(crate) fn commit(&self, ops: Vec<Operation>) -> Result<ChangeSet> {
        self.write_with(|_, _| Ok(ops))
    }

    /// Waits up to `wait` for change sets newer than `since`.
    pub(crate) fn poll(&self, epoch: u64, since: u64, wait: Duration) -> HubResponse {
        if epoch != self.epoch {
            return HubResponse::Reset;
        }
        let deadline = Instant::now() + wait;
        let mut log = self.log.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return HubResponse::from_error(&SharedDataError::Stopped);
            }
            if since > log.version {
                return HubResponse::Reset;
            }
            if since < log.version {
                let oldest = log.entries.front().map_or(log.version + 1, |c| c.version);
                if since + 1 < oldest {
                    return HubResponse::Reset;
                }
                let change_sets = log
                    .entries
                    .iter()
                    .filter(|c| c.version > since)
                    .cloned()
                    .collect();
                return HubResponse::Changes { change_sets };
            }
            if self.changed.wait_until(&mut log, deadline).timed_out() {
                return HubResponse::Changes {
                    change_sets: Vec::new(),
                };
            }
        }
    }

    /// Registers a local delivery channel for committed change sets.
    pub(crate) fn subscribe(&self, delivery: Delivery) -> u64 {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, delivery));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _log = self.log.lock();
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdata_types::{FieldKind, Record};
    use std::thread;

    fn schema() -> Schema {
        Schema::builder("kv")
            .record("entry", |t| t.field("k", FieldKind::Text).unique_key(["k"]))
            .build()
            .unwrap()
    }

    fn put(k: &str) -> Vec<Operation> {
        vec![Operation::Put {
            record: Record::new("entry").with("k", k),
        }]
    }

    fn path(p: &str) -> StorePath {
        StorePath::new(p).unwrap()
    }

    #[test]
    fn create_twice_is_a_conflict() {
        let host = StoreHost::new(HostConfig::default());
        host.create(&path("a"), &schema()).unwrap();
        assert!(matches!(
            host.create(&path("a"), &schema()),
            Err(SharedDataError::AlreadyExist(_))
        ));
        assert!(host.open(&path("a"), &schema()).is_ok());
    }

    #[test]
    fn open_fails_after_shutdown_even_for_existing_stores() {
        let host = StoreHost::new(HostConfig::default());
        host.create(&path("a"), &schema()).unwrap();
        host.shutdown();
        assert!(matches!(
            host.open(&path("a"), &schema()),
            Err(SharedDataError::Stopped)
        ));
        assert!(matches!(
            host.open(&path("b"), &schema()),
            Err(SharedDataError::Stopped)
        ));
    }

    #[test]
    fn open_rejects_a_different_schema() {
        let host = StoreHost::new(HostConfig::default());
        host.create(&path("a"), &schema()).unwrap();
        let other = Schema::builder("other")
            .record("x", |t| t.field("id", FieldKind::Integer).unique_key(["id"]))
            .build()
            .unwrap();
        assert!(matches!(
            host.open(&path("a"), &other),
            Err(SharedDataError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn list_returns_immediate_children_only() {
        let host = StoreHost::new(HostConfig::default());
        for p in ["root/a", "root/b/x", "root/b/y", "root", "rooted/c", "other/d"] {
            host.create(&path(p), &schema()).unwrap();
        }
        assert_eq!(
            host.list(&path("root")),
            vec![path("root/a"), path("root/b")]
        );
        assert!(host.list(&path("root/a")).is_empty());
    }

    #[test]
    fn poll_returns_missed_change_sets() {
        let host = StoreHost::new(HostConfig::default());
        let store = host.create(&path("a"), &schema()).unwrap();
        let epoch = store.snapshot().epoch;
        store.commit(put("x")).unwrap();
        store.commit(put("y")).unwrap();
        // An identical put changes nothing and takes no version.
        assert!(store.commit(put("y")).unwrap().is_empty());

        match store.poll(epoch, 0, Duration::ZERO) {
            HubResponse::Changes { change_sets } => {
                let versions: Vec<u64> = change_sets.iter().map(|c| c.version).collect();
                assert_eq!(versions, vec![1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            store.poll(epoch.wrapping_add(1), 0, Duration::ZERO),
            HubResponse::Reset
        ));
        assert!(matches!(store.poll(epoch, 9, Duration::ZERO), HubResponse::Reset));
    }

    #[test]
    fn truncated_log_forces_reset() {
        let host = StoreHost::new(HostConfig {
            log_capacity: 2,
            ..HostConfig::default()
        });
        let store = host.create(&path("a"), &schema()).unwrap();
        let epoch = store.snapshot().epoch;
        for k in ["a", "b", "c", "d"] {
            store.commit(put(k)).unwrap();
        }
        assert!(matches!(store.poll(epoch, 1, Duration::ZERO), HubResponse::Reset));
        assert!(matches!(
            store.poll(epoch, 2, Duration::ZERO),
            HubResponse::Changes { change_sets } if change_sets.len() == 2
        ));
    }

    #[test]
    fn poll_wakes_on_commit() {
        let host = StoreHost::new(HostConfig::default());
        let store = host.create(&path("a"), &schema()).unwrap();
        let epoch = store.snapshot().epoch;
        let poller = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.poll(epoch, 0, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        store.commit(put("x")).unwrap();
        let start = Instant::now();
        assert!(matches!(
            poller.join().unwrap(),
            HubResponse::Changes { change_sets } if change_sets.len() == 1
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn shutdown_wakes_pollers() {
        let host = Arc::new(StoreHost::new(HostConfig::default()));
        let store = host.create(&path("a"), &schema()).unwrap();
        let epoch = store.snapshot().epoch;
        let poller = thread::spawn(move || store.poll(epoch, 0, Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        host.shutdown();
        assert!(matches!(
            poller.join().unwrap(),
            HubResponse::Error { .. }
        ));
        assert!(matches!(
            host.create(&path("b"), &schema()),
            Err(SharedDataError::Stopped)
        ));
    }
}
