//! Client for a hosted repository's file-contents API
//!
//! Reads and conditionally overwrites single files in a remote repository,
//! using the store's own optimistic-concurrency primitive: every read returns
//! a version token (`sha`), and every write must present the token it was
//! based on. The store rejects writes whose token is stale, so two writers
//! can never silently clobber each other.
//!
//! Update flow:
//! 1. `ContentsClient::read_file()` fetches text + version token
//! 2. Caller computes the new text from the old one
//! 3. `ContentsClient::write_file()` PUTs the new text with the old token
//! 4. On `VersionConflict`, go back to step 1 (bounded)
//!
//! `ContentsClient::update_file()` and `ContentsClient::upsert_file()` run
//! this loop for a caller-supplied edit function.

pub mod client;
pub mod codec;
pub mod constants;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod status;

pub use client::{ContentsClient, Edit, RemoteFile, RepoConfig, RetryPolicy};
pub use constants::*;
pub use error::{Error, Result};
