//! The view handed to [`SharedData::data`].

use meshdata_types::{Record, RecordKey, Schema};
use std::collections::BTreeMap;

use crate::store::{Operation, RecordSet};
use crate::{Result, SharedDataError};

/// A transactional view over one store snapshot.
///
/// Reads see the snapshot plus anything staged in this transaction. In write
/// mode, [`put`](Self::put) and [`remove`](Self::remove) stage operations
/// that are committed together when the surrounding `write` returns.
pub struct Repository<'a> {
    schema: &'a Schema,
    base: &'a RecordSet,
    writable: bool,
    staged: BTreeMap<RecordKey, Option<Record>>,
    ops: Vec<Operation>,
}

impl<'a> Repository<'a> {
    pub(crate) fn reader(schema: &'a Schema, base: &'a RecordSet) -> Self {
        Self::new(schema, base, false)
    }

    pub(crate) fn writer(schema: &'a Schema, base: &'a RecordSet) -> Self {
        Self::new(schema, base, true)
    }

    fn new(schema: &'a Schema, base: &'a RecordSet, writable: bool) -> Self {
        Self {
            schema,
            base,
            writable,
            staged: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    /// The store schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Returns true in write mode.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Derives the key of `record`.
    pub fn key_of(&self, record: &Record) -> Result<RecordKey> {
        self.schema
            .key_of(record)
            .map_err(SharedDataError::from_validation)
    }

    /// Looks up a record by key.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(key),
        }
    }

    /// Looks up the stored record sharing `like`'s key.
    pub fn get_like(&self, like: &Record) -> Result<Option<&Record>> {
        let key = self.key_of(like)?;
        Ok(self.get(&key))
    }

    /// All records of one type, in key order.
    #[must_use]
    pub fn list(&self, type_name: &str) -> Vec<&Record> {
        self.records()
            .into_iter()
            .filter(|r| r.type_name() == type_name)
            .collect()
    }

    /// All records, in key order.
    #[must_use]
    pub fn records(&self) -> Vec<&Record> {
        let mut merged: BTreeMap<&RecordKey, &Record> = self.base.iter().collect();
        for (key, staged) in &self.staged {
            match staged {
                Some(record) => {
                    merged.insert(key, record);
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_values().collect()
    }

    /// Number of visible records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns true if no records are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stages an insert or replacement.
    pub fn put(&mut self, record: Record) -> Result<RecordKey> {
        if !self.writable {
            return Err(SharedDataError::ReadOnly);
        }
        let key = self
            .schema
            .validate(&record)
            .map_err(SharedDataError::from_validation)?;
        self.staged.insert(key.clone(), Some(record.clone()));
        self.ops.push(Operation::Put { record });
        Ok(key)
    }

    /// Stages a removal and returns the record it hides, if any.
    pub fn remove(&mut self, key: &RecordKey) -> Result<Option<Record>> {
        if !self.writable {
            return Err(SharedDataError::ReadOnly);
        }
        let previous = self.get(key).cloned();
        self.staged.insert(key.clone(), None);
        self.ops.push(Operation::Remove { key: key.clone() });
        Ok(previous)
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.ops
    }
}

/// A unit of work run against a store.
///
/// ```rust,ignore
/// service.write(&mut |repo: &mut Repository<'_>| -> Result<()> {
///     repo.put(Record::new("item").with("sku", "A-1"))?;
///     Ok(())
/// })?;
/// ```
pub trait SharedData {
    /// Reads from or stages mutations on `repository`.
    fn data(&mut self, repository: &mut Repository<'_>) -> Result<()>;
}

impl<F> SharedData for F
where
    F: FnMut(&mut Repository<'_>) -> Result<()>,
{
    fn data(&mut self, repository: &mut Repository<'_>) -> Result<()> {
        self(repository)
    }
}
