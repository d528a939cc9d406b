//! Member-side copies of hub stores.
//!
//! A replica installs a snapshot, then long-polls the hub for change sets and
//! replays them in version order. Anything that breaks the version chain
//! (a gap, an epoch change after a hub restart, a transport failure) is
//! repaired by installing a fresh snapshot, after which listeners receive
//! `reset()` and the service gets a new store id.

use meshdata_types::{ChangeSet, Schema};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ReplicaConfig;
use crate::protocol::{unexpected, HubClient, HubRequest, HubResponse};
use crate::service::ServiceCore;
use crate::store::{Operation, RecordSet};
use crate::{Result, SharedDataError};

struct View {
    records: RecordSet,
    version: u64,
    epoch: u64,
    synced: bool,
}

enum PollOutcome {
    InSync,
    OutOfSync,
}

pub(crate) struct Replica {
    core: Arc<ServiceCore>,
    client: HubClient,
    config: ReplicaConfig,
    open_timeout: Duration,
    view: RwLock<View>,
    writer: Mutex<()>,
}

impl Replica {
    /// Starts the sync thread. The first snapshot opens the core's latch.
    pub(crate) fn start(
        core: Arc<ServiceCore>,
        client: HubClient,
        config: ReplicaConfig,
        open_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let replica = Arc::new(Self {
            core,
            client,
            config,
            open_timeout,
            view: RwLock::new(View {
                records: RecordSet::new(),
                version: 0,
                epoch: 0,
                synced: false,
            }),
            writer: Mutex::new(()),
        });
        let runner = Arc::clone(&replica);
        thread::Builder::new()
            .name(format!("replica:{}", replica.core.path))
            .spawn(move || runner.run())?;
        Ok(replica)
    }

    pub(crate) fn version(&self) -> u64 {
        self.view.read().version
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Schema, &RecordSet) -> R) -> R {
        let view = self.view.read();
        f(&self.core.schema, &view.records)
    }

    /// Commits operations built against the local view, then applies the
    /// result locally before returning.
    pub(crate) fn write_with(
        &self,
        build: impl FnOnce(&Schema, &RecordSet) -> Result<Vec<Operation>>,
    ) -> Result<ChangeSet> {
        if !self.core.latch.wait(self.open_timeout) {
            return Err(SharedDataError::InitTimeout {
                path: self.core.path.clone(),
                timeout: self.open_timeout,
            });
        }
        let _writer = self.writer.lock();
        let (ops, epoch, version) = {
            let view = self.view.read();
            (build(&self.core.schema, &view.records)?, view.epoch, view.version)
        };
        if ops.is_empty() {
            return Ok(ChangeSet::new(version, Vec::new()));
        }

        let path = &self.core.path;
        let change_set = match self.client.send(
            &HubRequest::Commit {
                path: path.clone(),
                ops,
            },
            path,
        )? {
            HubResponse::Committed { change_set } => change_set,
            other => return Err(unexpected(&other)),
        };

        if !change_set.is_empty() {
            self.catch_up(epoch, &change_set);
        }
        Ok(change_set)
    }

    /// Brings the view up to `committed` so the writer reads its own write.
    fn catch_up(&self, epoch: u64, committed: &ChangeSet) {
        match self.apply(epoch, vec![committed.clone()]) {
            Ok(PollOutcome::InSync) if self.version() >= committed.version => return,
            Ok(_) => {}
            Err(e) => debug!(path = %self.core.path, error = %e, "Could not apply own commit"),
        }
        if let Err(e) = self.poll_once(Duration::ZERO) {
            debug!(path = %self.core.path, error = %e, "Catch-up poll failed");
        }
    }

    pub(crate) fn stop(&self) {
        self.client.release();
    }

    fn run(&self) {
        let mut needs_snapshot = true;
        while !self.core.is_stopped() {
            if needs_snapshot {
                match self.install_snapshot() {
                    Ok(()) => needs_snapshot = false,
                    Err(e) => {
                        if self.core.is_stopped() {
                            break;
                        }
                        warn!(path = %self.core.path, hub = %self.client.url(), error = %e, "Snapshot failed");
                        thread::sleep(self.config.retry_backoff);
                        continue;
                    }
                }
            }
            match self.poll_once(self.config.poll_wait) {
                Ok(PollOutcome::InSync) => {}
                Ok(PollOutcome::OutOfSync) => needs_snapshot = true,
                Err(e) => {
                    if self.core.is_stopped() {
                        break;
                    }
                    warn!(path = %self.core.path, hub = %self.client.url(), error = %e, "Poll failed");
                    needs_snapshot = true;
                    thread::sleep(self.config.retry_backoff);
                }
            }
        }
        debug!(path = %self.core.path, "Replica thread finished");
    }

    fn install_snapshot(&self) -> Result<()> {
        let path = &self.core.path;
        let snapshot = match self.client.send(
            &HubRequest::Open {
                path: path.clone(),
                schema: self.core.schema.clone(),
            },
            path,
        )? {
            HubResponse::Snapshot(snapshot) => snapshot,
            other => return Err(unexpected(&other)),
        };
        let records = RecordSet::from_records(&self.core.schema, snapshot.records)?;

        let mut view = self.view.write();
        let first = !view.synced;
        *view = View {
            records,
            version: snapshot.version,
            epoch: snapshot.epoch,
            synced: true,
        };
        if first {
            self.core.latch.open();
            info!(path = %path, version = view.version, "Replica initialized");
        } else {
            let id = self.core.renew_id();
            self.core.counters.resynced();
            self.core.delivery.reset();
            info!(path = %path, version = view.version, store_id = id, "Replica resynchronized");
        }
        Ok(())
    }

    fn poll_once(&self, wait: Duration) -> Result<PollOutcome> {
        let (epoch, since) = {
            let view = self.view.read();
            (view.epoch, view.version)
        };
        let path = &self.core.path;
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        match self.client.send(
            &HubRequest::Poll {
                path: path.clone(),
                epoch,
                since,
                wait_ms,
            },
            path,
        )? {
            HubResponse::Changes { change_sets } => self.apply(epoch, change_sets),
            HubResponse::Reset => Ok(PollOutcome::OutOfSync),
            other => Err(unexpected(&other)),
        }
    }

    /// Replays change sets that extend the view. Change sets already applied
    /// are skipped; results for a replaced epoch are ignored.
    fn apply(&self, epoch: u64, change_sets: Vec<ChangeSet>) -> Result<PollOutcome> {
        let mut view = self.view.write();
        if view.epoch != epoch {
            return Ok(PollOutcome::InSync);
        }
        for change_set in change_sets {
            if change_set.version <= view.version {
                continue;
            }
            if change_set.version != view.version + 1 {
                debug!(
                    path = %self.core.path,
                    have = view.version,
                    got = change_set.version,
                    "Version gap"
                );
                return Ok(PollOutcome::OutOfSync);
            }
            view.records.replay(&self.core.schema, &change_set.changes)?;
            view.version = change_set.version;
            self.core.delivery.event(change_set);
        }
        Ok(PollOutcome::InSync)
    }
}
