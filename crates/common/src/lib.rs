//! Shared types for the keydrop workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
