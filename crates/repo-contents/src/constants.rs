//! Contents API constants

/// Default API root for the hosted repository service
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Media type requested on every call
pub const ACCEPT: &str = "application/vnd.github+json";

/// Pinned REST API version header value
pub const API_VERSION: &str = "2022-11-28";

/// The API refuses requests without a User-Agent
pub const USER_AGENT: &str = concat!("keydrop/", env!("CARGO_PKG_VERSION"));
