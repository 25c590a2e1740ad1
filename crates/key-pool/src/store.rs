//! The `KeyStore` abstraction shared by both backends
//!
//! Business logic talks to `Arc<dyn KeyStore>` and never checks which backend
//! it got. Methods return boxed `Send` futures so the trait stays
//! dyn-compatible.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::period::Period;

/// Boxed future returned by `KeyStore` methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of `delete_key_and_save_solved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Removed from this period's pool and appended to the solved file
    Moved { period: Period },
    /// No configured pool held the key; nothing was written
    NotInAnyPool,
}

/// Period-scoped key inventory.
///
/// Keys move one way only: from a period's pool (available) to the solved
/// file (dispensed).
pub trait KeyStore: Send + Sync {
    /// Backend identifier for logs and health ("github" or "local").
    fn backend(&self) -> &str;

    /// Periods searched by `delete_key_and_save_solved`, in search order.
    fn periods(&self) -> &[Period];

    /// The period's pool in offer order. Empty when the pool file is missing.
    fn list_keys<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Remove the head of the period's pool and append it to the solved file.
    ///
    /// Fails with `PoolEmpty` when the pool is empty or missing, without
    /// touching the solved file.
    fn reserve_and_consume_key<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<String>>;

    /// Append a key at the tail of an existing pool. No duplicate check.
    fn add_key<'a>(&'a self, period: &'a Period, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Move a known key from whichever configured pool holds it to the solved
    /// file. A key found in no pool is logged and reported as
    /// `NotInAnyPool`, not as an error.
    fn delete_key_and_save_solved<'a>(&'a self, key: &'a str)
    -> BoxFuture<'a, Result<DeleteOutcome>>;

    /// Dispensed keys, oldest first. Empty when the solved file is missing.
    fn list_solved(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// The key `reserve_and_consume_key` would hand out next.
    fn peek_key<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.list_keys(period).await?.into_iter().next()) })
    }

    /// Remaining stock for a period.
    fn count_keys<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move { Ok(self.list_keys(period).await?.len()) })
    }
}
