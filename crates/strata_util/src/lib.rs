//! # Strata Util
//!
//! Async-aware lock primitives and small helpers shared across Strata
//! crates.
//!
//! This crate provides:
//! - [`Mutex`]: an async critical-section lock
//! - [`MultiMutex`]: atomic all-or-wait acquisition of a set of string
//!   keys, with no partial acquisition
//! - [`hex`]: byte/hex formatting used for lock keys and cursors

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod hex;
mod multi_mutex;
mod mutex;

pub use multi_mutex::{MultiMutex, MultiMutexGuard};
pub use mutex::{Mutex, MutexGuard};
