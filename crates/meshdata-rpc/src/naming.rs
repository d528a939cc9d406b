//! The naming store: which url hosts which service key.

use meshdata_shared::{Repository, SharedDataManager, SharedDataService};
use meshdata_types::{FieldKind, Record, Schema, StorePath};
use std::collections::BTreeSet;
use tracing::debug;

use crate::{Result, RpcError};

/// Path of the naming store shared by every peer.
pub const NAMING_PATH: &str = "meshdata/naming";

const RECORD: &str = "service";

/// Schema of the naming store.
pub fn naming_schema() -> Result<Schema> {
    let schema = Schema::builder("meshdata-naming")
        .record(RECORD, |t| {
            t.field("service_type", FieldKind::Text)
                .field("key", FieldKind::Text)
                .field("url", FieldKind::Text)
                .field("process", FieldKind::Text)
                .unique_key(["service_type", "key"])
        })
        .build()?;
    Ok(schema)
}

/// One published registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingEntry {
    /// Service type.
    pub service_type: String,
    /// Registration key.
    pub key: String,
    /// Url of the peer hosting the implementation.
    pub url: String,
    /// Name of the hosting process.
    pub process: String,
}

impl NamingEntry {
    fn to_record(&self) -> Record {
        Record::new(RECORD)
            .with("service_type", self.service_type.as_str())
            .with("key", self.key.as_str())
            .with("url", self.url.as_str())
            .with("process", self.process.as_str())
    }

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            service_type: record.get_str("service_type")?.to_string(),
            key: record.get_str("key")?.to_string(),
            url: record.get_str("url")?.to_string(),
            process: record.get_str("process").unwrap_or_default().to_string(),
        })
    }
}

fn key_record(service_type: &str, key: &str) -> Record {
    Record::new(RECORD)
        .with("service_type", service_type)
        .with("key", key)
}

pub(crate) struct Naming {
    service: SharedDataService,
}

impl Naming {
    pub(crate) fn open(manager: &SharedDataManager) -> Result<Self> {
        let path = StorePath::new(NAMING_PATH)?;
        let service = manager.get_shared_data_service_sync(&path, &naming_schema()?)?;
        Ok(Self { service })
    }

    /// Publishes `entry`. Fails if another url holds the key.
    pub(crate) fn publish(&self, entry: &NamingEntry) -> Result<()> {
        let mut holder = None;
        self.service
            .write(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
                let record = entry.to_record();
                if let Some(existing) = repo.get_like(&record)? {
                    let url = existing.get_str("url").unwrap_or_default();
                    if url != entry.url {
                        holder = Some(url.to_string());
                        return Ok(());
                    }
                }
                repo.put(record)?;
                Ok(())
            })?;
        if let Some(url) = holder {
            debug!(service_type = %entry.service_type, key = %entry.key, holder = %url, "Key held elsewhere");
            return Err(RpcError::Conflict {
                service_type: entry.service_type.clone(),
                key: entry.key.clone(),
            });
        }
        Ok(())
    }

    /// Removes the entry for the key if `url` still holds it.
    pub(crate) fn withdraw(&self, service_type: &str, key: &str, url: &str) -> Result<()> {
        self.service
            .write(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
                let wanted = key_record(service_type, key);
                let held = repo
                    .get_like(&wanted)?
                    .is_some_and(|existing| existing.get_str("url") == Some(url));
                if held {
                    let key = repo.key_of(&wanted)?;
                    repo.remove(&key)?;
                }
                Ok(())
            })?;
        Ok(())
    }

    pub(crate) fn lookup(&self, service_type: &str, key: &str) -> Result<Option<NamingEntry>> {
        let mut found = None;
        self.service
            .read(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
                found = repo
                    .get_like(&key_record(service_type, key))?
                    .and_then(NamingEntry::from_record);
                Ok(())
            })?;
        Ok(found)
    }

    pub(crate) fn entries(&self, service_type: Option<&str>) -> Result<Vec<NamingEntry>> {
        let mut entries = Vec::new();
        self.service
            .read(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
                entries = repo
                    .list(RECORD)
                    .into_iter()
                    .filter_map(NamingEntry::from_record)
                    .filter(|e| service_type.map_or(true, |t| e.service_type == t))
                    .collect();
                Ok(())
            })?;
        Ok(entries)
    }

    pub(crate) fn keys(&self, service_type: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .entries(Some(service_type))?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }
}
