//! Ambient transaction context.

use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use std::sync::Arc;

/// Carries the ambient transaction through a call tree.
///
/// Contexts are cheap to clone and are passed by value into transaction
/// closures. A context either holds the transaction of the enclosing
/// `in_tx` call or is empty (outside any transaction).
#[derive(Clone, Default)]
pub struct Context {
    tx: Option<Arc<Transaction>>,
}

impl Context {
    /// An empty context, used at the outermost call sites.
    pub fn background() -> Self {
        Self { tx: None }
    }

    /// Wraps a transaction into a context.
    pub(crate) fn with_transaction(tx: Arc<Transaction>) -> Self {
        Self { tx: Some(tx) }
    }

    /// The ambient transaction, if any.
    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.tx.as_ref()
    }

    /// The ambient transaction, or [`CoreError::NoTransaction`].
    pub fn require_transaction(&self) -> CoreResult<&Arc<Transaction>> {
        self.tx.as_ref().ok_or(CoreError::NoTransaction)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tx {
            Some(tx) => write!(f, "Context(tx:{})", tx.id()),
            None => write!(f, "Context(background)"),
        }
    }
}
