//! # Strata Entity
//!
//! The entity layer of Strata: typed records over tuple keys, with
//! transactional secondary-index maintenance.
//!
//! This crate provides:
//! - [`EntityDescriptor`] / [`SecondaryIndexDescriptor`]: frozen
//!   per-type metadata, normally produced by generated code
//! - [`EntityFactory`]: identity-mapped `create` / `find_by_id` /
//!   `find_all` / queries over one entity type
//! - [`Entity`]: a live record with a dirty buffer, implicit
//!   flush-before-commit, and one-shot delete
//! - Primary, unique and range index maintenance with merged lock-key
//!   acquisition (the four-phase lock → before → on → after protocol)
//! - [`IndexStream`]: batched, cursor-resumable range scans
//! - [`AtomicCounter`] / [`AtomicFlag`]: conflict-free counters
//!
//! Constraint checks (`entity already exists`, `unique index constraint
//! violation`) run strictly before any index mutation of the affected
//! record, under lock keys merged across every attached index, so
//! concurrent flushes cannot validate against each other's unapplied
//! writes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomics;
mod descriptor;
mod entity;
mod error;
mod factory;
mod indexes;
mod record;
mod store;
mod stream;

pub use atomics::{AtomicCounter, AtomicFlag};
pub use descriptor::{
    EntityDescriptor, FieldDescriptor, FieldKind, IndexPredicate, PrimaryKeyDescriptor,
    SecondaryIndexDescriptor, SecondaryIndexKind,
};
pub use entity::Entity;
pub use error::{EntityError, EntityResult};
pub use factory::{EntityFactory, QueryOptions, QueryResult};
pub use record::{FieldValue, Metadata, Record, RecordCodec, StoredRecord};
pub use store::EntityStore;
pub use stream::{cursor_to_tuple, tuple_to_cursor, IndexStream, StreamOptions};
