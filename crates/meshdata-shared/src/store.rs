//! The record set held by every store copy.

use meshdata_types::{Change, Record, RecordKey, Schema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Result, SharedDataError};

/// A mutation shipped from a writer to the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Insert or replace a record.
    Put {
        /// The record to store.
        record: Record,
    },
    /// Remove the record with this key, if any.
    Remove {
        /// Key of the record to remove.
        key: RecordKey,
    },
}

/// Records of one store, indexed by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<RecordKey, Record>,
}

impl RecordSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from records, keyed by `schema`.
    pub fn from_records(schema: &Schema, records: Vec<Record>) -> Result<Self> {
        let mut set = Self::new();
        for record in records {
            let key = schema.key_of(&record)?;
            set.records.insert(key, record);
        }
        Ok(set)
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Iterates over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &Record)> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the set holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clones every record out, in key order.
    #[must_use]
    pub fn to_records(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    /// Applies `ops` atomically and returns the resulting changes.
    ///
    /// Every put is validated before anything is applied, so a failing batch
    /// leaves the set untouched. Puts of an identical record and removals of
    /// absent keys produce no change.
    pub fn apply(&mut self, schema: &Schema, ops: Vec<Operation>) -> Result<Vec<Change>> {
        let mut keyed = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                Operation::Put { record } => {
                    let key = schema
                        .validate(&record)
                        .map_err(SharedDataError::from_validation)?;
                    keyed.push((key, Some(record)));
                }
                Operation::Remove { key } => keyed.push((key, None)),
            }
        }

        let mut changes = Vec::new();
        for (key, record) in keyed {
            match record {
                Some(record) => match self.records.insert(key, record.clone()) {
                    None => changes.push(Change::Created { record }),
                    Some(before) if before != record => changes.push(Change::Updated {
                        before,
                        after: record,
                    }),
                    Some(_) => {}
                },
                None => {
                    if let Some(record) = self.records.remove(&key) {
                        changes.push(Change::Removed { record });
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Replays changes produced elsewhere.
    pub fn replay(&mut self, schema: &Schema, changes: &[Change]) -> Result<()> {
        for change in changes {
            let record = change.record();
            let key = schema.key_of(record)?;
            if change.is_removal() {
                self.records.remove(&key);
            } else {
                self.records.insert(key, record.clone());
            }
        }
        Ok(())
    }
}
