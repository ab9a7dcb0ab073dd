//! # Strata Core
//!
//! The transaction retry core for Strata.
//!
//! This crate provides:
//! - [`Database`]: a handle over a backing ordered key-value store
//! - [`in_tx`], [`in_read_only_tx`], [`in_hybrid_tx`]: combinators that
//!   turn a user closure into an automatically-retried transaction
//! - [`Transaction`]: hooks, user data, versionstamp allocation and the
//!   lazily-created backend handle
//! - [`Subspace`]: prefixed, independently key/value-typed views over
//!   the keyspace
//! - [`TransactionCache`]: values scoped to one transaction attempt
//! - [`DirectoryLayer`]: the named-path-to-prefix contract, with a
//!   minimal transactional allocator for tests
//!
//! ## Transactions
//!
//! ```rust,ignore
//! let db = Database::open_test();
//! let value = in_tx::<_, CoreError, _, _>(&db, &Context::background(), |ctx| async move {
//!     let space = Subspace::tuple(db.clone(), directory_prefix.clone());
//!     space.set(&ctx, &key, &value)?;
//!     Ok(space.get(&ctx, &other_key).await?)
//! }).await?;
//! ```
//!
//! Closures must be re-runnable: a retryable backend error derives a
//! fresh transaction of the same lineage and runs the closure again.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod context;
mod database;
mod directory;
mod error;
mod retry;
mod subspace;
mod transaction;

pub use cache::TransactionCache;
pub use context::Context;
pub use database::Database;
pub use directory::{DirectoryLayer, SimpleDirectory};
pub use error::{CoreError, CoreResult, TxError};
pub use retry::{in_hybrid_tx, in_read_only_tx, in_tx};
pub use subspace::{
    key_increment, KeyEncoding, KeyValuePair, RangeOptions, RawEncoding, Subspace, TupleEncoding,
    ValueEncoding,
};
pub use transaction::Transaction;
