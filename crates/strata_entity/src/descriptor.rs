//! Entity and index descriptors.
//!
//! Descriptors are constructed once at store-open time (normally by
//! generated code) and shared, frozen, by every factory and entity
//! instance of that type. The core only depends on the shapes defined
//! here, not on how they were produced.

use crate::error::{EntityError, EntityResult};
use crate::record::{FieldValue, Record, StoredRecord};
use std::sync::Arc;
use strata_core::Subspace;
use strata_tuple::TupleItem;

/// The scalar kind of a field or primary-key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A boolean field.
    Boolean,
    /// A signed integer field.
    Integer,
    /// A double field.
    Float,
    /// A UTF-8 text field.
    Text,
    /// A byte-string field.
    Bytes,
}

impl FieldKind {
    fn matches(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Boolean, FieldValue::Boolean(_))
                | (Self::Integer, FieldValue::Integer(_))
                | (Self::Float, FieldValue::Float(_))
                | (Self::Text, FieldValue::Text(_))
                | (Self::Bytes, FieldValue::Bytes(_))
        )
    }
}

/// One component of the primary-key tuple.
#[derive(Debug, Clone)]
pub struct PrimaryKeyDescriptor {
    /// Field name the component is stored under.
    pub name: String,
    /// Component kind.
    pub kind: FieldKind,
}

/// One user-visible field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
    /// Whether null is an acceptable value.
    pub optional: bool,
}

/// The kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryIndexKind {
    /// At most one row per derived index key.
    Unique,
    /// Ordered scans over a field-derived prefix.
    Range,
}

/// A predicate over the record shape, for partial indexes.
pub type IndexPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Describes one secondary index of an entity type.
#[derive(Clone)]
pub struct SecondaryIndexDescriptor {
    /// Index name, unique within the entity type.
    pub name: String,
    /// Storage key the index subspace was resolved under.
    pub storage_key: String,
    /// Index kind.
    pub kind: SecondaryIndexKind,
    /// Source fields, in key order.
    pub fields: Vec<String>,
    /// Partial-index condition; rows enter the index only while it
    /// holds.
    pub condition: Option<IndexPredicate>,
    /// Subspace holding the index rows.
    pub subspace: Subspace<Vec<TupleItem>, StoredRecord>,
}

impl std::fmt::Debug for SecondaryIndexDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndexDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("conditional", &self.condition.is_some())
            .finish_non_exhaustive()
    }
}

/// Describes one entity type.
#[derive(Clone)]
pub struct EntityDescriptor {
    /// Entity type name.
    pub name: String,
    /// Storage key the entity subspace was resolved under.
    pub storage_key: String,
    /// Subspace holding the primary rows.
    pub subspace: Subspace<Vec<TupleItem>, StoredRecord>,
    /// Primary-key components, in tuple order.
    pub primary_keys: Vec<PrimaryKeyDescriptor>,
    /// User-visible fields (excluding primary-key components).
    pub fields: Vec<FieldDescriptor>,
    /// Secondary indexes.
    pub secondary_indexes: Vec<SecondaryIndexDescriptor>,
    /// Whether `delete` is permitted for this type.
    pub allow_delete: bool,
}

impl EntityDescriptor {
    /// Validates a raw primary key against the descriptor.
    pub fn resolve_primary_key(&self, id: &[TupleItem]) -> EntityResult<Vec<TupleItem>> {
        if id.len() != self.primary_keys.len() {
            return Err(EntityError::invalid_primary_key(format!(
                "expected {} components, got {}",
                self.primary_keys.len(),
                id.len()
            )));
        }
        for (item, pk) in id.iter().zip(&self.primary_keys) {
            let value = FieldValue::from_tuple_item(item)?;
            if !pk.kind.matches(&value) {
                return Err(EntityError::invalid_primary_key(format!(
                    "component {} has the wrong kind",
                    pk.name
                )));
            }
        }
        Ok(id.to_vec())
    }

    /// Extracts the primary-key tuple from a stored record.
    pub fn primary_key_from_record(&self, record: &Record) -> EntityResult<Vec<TupleItem>> {
        self.primary_keys
            .iter()
            .map(|pk| {
                record
                    .get(&pk.name)
                    .map(FieldValue::to_tuple_item)
                    .ok_or_else(|| {
                        EntityError::malformed_record(format!(
                            "primary key field {} missing",
                            pk.name
                        ))
                    })
            })
            .collect()
    }

    /// Normalizes a record against the descriptor: primary-key fields
    /// are injected from `id`, absent optional fields become null,
    /// mistyped or unknown fields are rejected.
    pub fn normalize(&self, id: &[TupleItem], src: Record) -> EntityResult<Record> {
        let mut out = Record::new();
        for (item, pk) in id.iter().zip(&self.primary_keys) {
            out.set(pk.name.clone(), FieldValue::from_tuple_item(item)?);
        }
        for field in &self.fields {
            match src.get(&field.name) {
                None | Some(FieldValue::Null) => {
                    if !field.optional {
                        return Err(EntityError::invalid_shape(format!(
                            "required field {} missing",
                            field.name
                        )));
                    }
                    out.set(field.name.clone(), FieldValue::Null);
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(EntityError::invalid_shape(format!(
                            "field {} has the wrong kind",
                            field.name
                        )));
                    }
                    out.set(field.name.clone(), value.clone());
                }
            }
        }
        for (name, _) in src.iter() {
            let known = self.fields.iter().any(|f| &f.name == name)
                || self.primary_keys.iter().any(|pk| &pk.name == name);
            if !known {
                return Err(EntityError::invalid_shape(format!("unknown field {name}")));
            }
        }
        Ok(out)
    }

    /// Validates a single field assignment.
    pub fn check_field(&self, name: &str, value: &FieldValue) -> EntityResult<()> {
        if self.primary_keys.iter().any(|pk| pk.name == name) {
            return Err(EntityError::invalid_operation(format!(
                "primary key field {name} is immutable"
            )));
        }
        let field = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| EntityError::invalid_shape(format!("unknown field {name}")))?;
        match value {
            FieldValue::Null if field.optional => Ok(()),
            FieldValue::Null => Err(EntityError::invalid_shape(format!(
                "required field {name} cannot be null"
            ))),
            value if field.kind.matches(value) => Ok(()),
            _ => Err(EntityError::invalid_shape(format!(
                "field {name} has the wrong kind"
            ))),
        }
    }

    /// Finds a secondary index by name.
    pub fn secondary_index(&self, name: &str) -> EntityResult<&SecondaryIndexDescriptor> {
        self.secondary_indexes
            .iter()
            .find(|ix| ix.name == name)
            .ok_or_else(|| EntityError::invalid_operation(format!("unknown index {name}")))
    }
}

impl std::fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("primary_keys", &self.primary_keys.len())
            .field("fields", &self.fields.len())
            .field("secondary_indexes", &self.secondary_indexes.len())
            .finish_non_exhaustive()
    }
}

/// Derives an index key from a record per the index's field list.
pub(crate) fn resolve_index_key(
    index: &SecondaryIndexDescriptor,
    record: &Record,
) -> EntityResult<Vec<TupleItem>> {
    index
        .fields
        .iter()
        .map(|name| {
            record
                .get(name)
                .map(FieldValue::to_tuple_item)
                .ok_or_else(|| {
                    EntityError::malformed_record(format!("index field {name} missing"))
                })
        })
        .collect()
}
