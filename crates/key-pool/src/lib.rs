//! Period-scoped license key inventory
//!
//! Each period ("1d", "30d", ...) owns an ordered pool of unused keys in its
//! own text file; dispensed keys are appended to a single solved file. The
//! `KeyStore` trait exposes the inventory operations, with two backends chosen
//! once at start-up:
//!
//! - `RemoteKeyStore`: files live in a hosted repository and every mutation
//!   is a compare-and-swap through `repo_contents::ContentsClient`
//! - `LocalKeyStore`: files live on local disk; single-writer only
//!
//! Key lifecycle:
//! 1. Operator seeds or restocks a pool (`add_key` appends at the tail)
//! 2. Storefront shows stock (`count_keys`) and the next key (`peek_key`)
//! 3. After the buyer's email goes out, `reserve_and_consume_key` removes the
//!    head of the pool and appends it to the solved file
//! 4. Manual fix-ups move a known key with `delete_key_and_save_solved`
//!
//! The pool-to-solved move is two separate writes. If the second one fails
//! the key has left the pool but was never recorded as solved; the failure is
//! logged with the full key so an operator can reconcile it.

pub mod error;
pub mod keyfile;
pub mod local;
pub mod period;
pub mod remote;
pub mod store;

pub use error::{Error, Result};
pub use local::LocalKeyStore;
pub use period::{KeyLayout, Period};
pub use remote::RemoteKeyStore;
pub use store::{BoxFuture, DeleteOutcome, KeyStore};
