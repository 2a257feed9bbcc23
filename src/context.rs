//! Operation context: cancellation, deadline and transaction scope.
//!
//! Every cache and repository operation takes a `&Context`. The context carries
//!
//! - a [`CancellationToken`] observed at the start of each operation,
//! - an optional deadline,
//! - the transaction the operation runs in, if any.
//!
//! Repositories open transactions with [`Repository::begin_tx`](crate::Repository::begin_tx),
//! which returns a new context bound to the transaction. Store calls made with
//! that context are part of the transaction.
//!
//! ```
//! use cache_through::Context;
//! use std::time::Duration;
//!
//! let ctx = Context::new().with_timeout(Duration::from_secs(5));
//! assert!(ctx.check().is_ok());
//!
//! ctx.cancel();
//! assert!(ctx.check().is_err());
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Opaque transaction handle minted by a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(u64);

impl TxId {
    /// Wrap a repository-specific transaction number.
    pub fn new(raw: u64) -> Self {
        TxId(raw)
    }

    /// Raw transaction number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Cancellation, deadline and transaction scope of a single operation.
///
/// Cloning is cheap; clones share the cancellation token.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<TxId>,
}

impl Context {
    /// Create a fresh context with no deadline and no transaction.
    pub fn new() -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
            tx: None,
        }
    }

    /// Create a context observing an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Context {
            token,
            deadline: None,
            tx: None,
        }
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context bound to the given transaction.
    ///
    /// Used by repositories from `begin_tx`.
    pub fn with_tx(&self, tx: TxId) -> Self {
        Context {
            token: self.token.clone(),
            deadline: self.deadline,
            tx: Some(tx),
        }
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The transaction this context is bound to.
    pub fn tx(&self) -> Option<TxId> {
        self.tx
    }

    /// Fail with `Error::Cancelled` or `Error::Timeout` if the operation must stop.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` once the token is cancelled
    /// - `Error::Timeout` once the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout("context deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
