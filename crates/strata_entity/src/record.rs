//! Record payloads and their canonical binary encoding.

use crate::error::{EntityError, EntityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_core::{CoreError, CoreResult, ValueEncoding};
use strata_tuple::TupleItem;

/// One field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// The null value, used for absent optional fields.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A signed integer.
    Integer(i64),
    /// An IEEE-754 double.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// An opaque byte string.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Convenience constructor for text fields.
    pub fn text(src: impl Into<String>) -> Self {
        Self::Text(src.into())
    }

    /// Converts a field value into its tuple form for key construction.
    pub fn to_tuple_item(&self) -> TupleItem {
        match self {
            Self::Null => TupleItem::Null,
            Self::Boolean(v) => TupleItem::Boolean(*v),
            Self::Integer(v) => TupleItem::Integer(*v),
            Self::Float(v) => TupleItem::Double(*v),
            Self::Text(v) => TupleItem::Text(v.clone()),
            Self::Bytes(v) => TupleItem::Bytes(v.clone()),
        }
    }

    /// Converts a tuple item into a field value.
    ///
    /// Versionstamps and nested tuples have no field representation.
    pub fn from_tuple_item(item: &TupleItem) -> EntityResult<Self> {
        match item {
            TupleItem::Null => Ok(Self::Null),
            TupleItem::Boolean(v) => Ok(Self::Boolean(*v)),
            TupleItem::Integer(v) => Ok(Self::Integer(*v)),
            TupleItem::Double(v) => Ok(Self::Float(*v)),
            TupleItem::Text(v) => Ok(Self::Text(v.clone())),
            TupleItem::Bytes(v) => Ok(Self::Bytes(v.clone())),
            other => Err(EntityError::invalid_primary_key(format!(
                "unsupported key item: {other:?}"
            ))),
        }
    }
}

/// An ordered map of named fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Reads a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Writes a field.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Record metadata maintained by the entity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Bumped on every flushed update; 0 at creation.
    pub version: u64,
    /// Creation timestamp in milliseconds, immutable.
    pub created_at: i64,
    /// Last-flush timestamp in milliseconds.
    pub updated_at: i64,
}

/// A record together with its metadata, as stored in the keyspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The user-visible fields.
    pub value: Record,
    /// Engine-maintained metadata.
    pub metadata: Metadata,
}

/// Canonical CBOR encoding for stored records.
pub struct RecordCodec;

impl ValueEncoding<StoredRecord> for RecordCodec {
    fn pack(&self, value: &StoredRecord) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out)
            .map_err(|e| CoreError::invalid_operation(format!("record encode failed: {e}")))?;
        Ok(out)
    }

    fn unpack(&self, raw: &[u8]) -> CoreResult<StoredRecord> {
        ciborium::de::from_reader(raw)
            .map_err(|e| CoreError::invalid_operation(format!("record decode failed: {e}")))
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
