//! Record schemas.
//!
//! A [`Schema`] is an immutable descriptor built once at startup with
//! [`SchemaBuilder`] and passed explicitly to the stores that use it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::{Error, Record, RecordKey, Result};

/// The kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// A boolean.
    Bool,
    /// A signed or unsigned integer.
    Integer,
    /// Any JSON number.
    Float,
    /// A UTF-8 string.
    Text,
    /// An arbitrary JSON document.
    Json,
}

impl FieldKind {
    /// Returns true if `value` is acceptable for this kind. Null is accepted
    /// for every kind; key fields are checked separately.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldKind::Json, _) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Float, Value::Number(_)) => true,
            (FieldKind::Text, Value::String(_)) => true,
            _ => false,
        }
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
}

/// A record type: its fields and the fields forming its unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    /// Type name.
    pub name: String,
    /// Declared fields.
    pub fields: Vec<FieldDef>,
    /// Fields whose values identify a record of this type.
    pub unique_key: Vec<String>,
}

impl RecordType {
    /// Looks up a field definition.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// An immutable set of record types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    types: BTreeMap<String, RecordType>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Returns the schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a record type.
    #[must_use]
    pub fn record_type(&self, name: &str) -> Option<&RecordType> {
        self.types.get(name)
    }

    /// Iterates over the record types.
    pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    /// Derives the unique key of a record without checking its other fields.
    pub fn key_of(&self, record: &Record) -> Result<RecordKey> {
        let record_type = self.lookup(record)?;
        let mut values = Vec::with_capacity(record_type.unique_key.len());
        for field in &record_type.unique_key {
            match record.get(field) {
                None | Some(Value::Null) => {
                    return Err(Error::InvalidRecord(format!(
                        "{}: missing key field '{field}'",
                        record.type_name()
                    )))
                }
                Some(value) => values.push(value.to_string()),
            }
        }
        Ok(RecordKey::new(record.type_name(), values))
    }

    /// Checks a record against its type and returns its key.
    pub fn validate(&self, record: &Record) -> Result<RecordKey> {
        let record_type = self.lookup(record)?;
        for (name, value) in record.fields() {
            let def = record_type.field(name).ok_or_else(|| {
                Error::InvalidRecord(format!("{}: unknown field '{name}'", record_type.name))
            })?;
            if !def.kind.accepts(value) {
                return Err(Error::InvalidRecord(format!(
                    "{}: field '{name}' expects {:?}, got {value}",
                    record_type.name, def.kind
                )));
            }
        }
        self.key_of(record)
    }

    fn lookup(&self, record: &Record) -> Result<&RecordType> {
        self.types.get(record.type_name()).ok_or_else(|| {
            Error::InvalidRecord(format!(
                "unknown record type '{}' in schema '{}'",
                record.type_name(),
                self.name
            ))
        })
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    types: Vec<RecordType>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// Adds a record type configured by `define`.
    #[must_use]
    pub fn record<F>(mut self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(RecordTypeBuilder) -> RecordTypeBuilder,
    {
        let builder = define(RecordTypeBuilder {
            record_type: RecordType {
                name: name.into(),
                fields: Vec::new(),
                unique_key: Vec::new(),
            },
        });
        self.types.push(builder.record_type);
        self
    }

    /// Validates and freezes the schema.
    pub fn build(self) -> Result<Schema> {
        if self.name.is_empty() {
            return Err(Error::InvalidSchema("schema name cannot be empty".into()));
        }

        let mut types = BTreeMap::new();
        for record_type in self.types {
            let mut seen = HashSet::new();
            for field in &record_type.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "{}: duplicate field '{}'",
                        record_type.name, field.name
                    )));
                }
            }
            if record_type.unique_key.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "{}: unique key cannot be empty",
                    record_type.name
                )));
            }
            for key in &record_type.unique_key {
                if record_type.field(key).is_none() {
                    return Err(Error::InvalidSchema(format!(
                        "{}: unique key references unknown field '{key}'",
                        record_type.name
                    )));
                }
            }
            let name = record_type.name.clone();
            if types.insert(name.clone(), record_type).is_some() {
                return Err(Error::InvalidSchema(format!("duplicate record type '{name}'")));
            }
        }

        Ok(Schema {
            name: self.name,
            types,
        })
    }
}

/// Builder for a single [`RecordType`].
#[derive(Debug)]
pub struct RecordTypeBuilder {
    record_type: RecordType,
}

impl RecordTypeBuilder {
    /// Declares a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.record_type.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Sets the fields forming the unique key.
    #[must_use]
    pub fn unique_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_type.unique_key = fields.into_iter().map(Into::into).collect();
        self
    }
}
