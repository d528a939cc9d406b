//! Change sets emitted by store mutations.

use serde::{Deserialize, Serialize};

use crate::Record;

/// A single record-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// A record was created.
    Created {
        /// The new record.
        record: Record,
    },
    /// A record was replaced.
    Updated {
        /// The record before the write.
        before: Record,
        /// The record after the write.
        after: Record,
    },
    /// A record was removed.
    Removed {
        /// The removed record.
        record: Record,
    },
}

impl Change {
    /// Returns the record as it exists after the change (the removed record
    /// for removals).
    #[must_use]
    pub fn record(&self) -> &Record {
        match self {
            Change::Created { record } | Change::Removed { record } => record,
            Change::Updated { after, .. } => after,
        }
    }

    /// Returns true for removals.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self, Change::Removed { .. })
    }
}

/// An ordered diff committed to a store as one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Store version this change set produced.
    pub version: u64,
    /// Changes in commit order.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// Creates a change set.
    #[must_use]
    pub fn new(version: u64, changes: Vec<Change>) -> Self {
        Self { version, changes }
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterates over the changes in order.
    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_record_accessor() {
        let before = Record::new("t").with("k", 1);
        let after = Record::new("t").with("k", 2);
        let change = Change::Updated {
            before,
            after: after.clone(),
        };
        assert_eq!(change.record(), &after);
        assert!(!change.is_removal());
    }

    #[test]
    fn change_set_json_is_tagged() {
        let set = ChangeSet::new(
            3,
            vec![Change::Removed {
                record: Record::new("t").with("k", 1),
            }],
        );
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"op\":\"removed\""));
        let back: ChangeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.len(), 1);
    }
}
