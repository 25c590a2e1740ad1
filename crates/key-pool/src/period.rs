//! Period tags and the on-disk/in-repo file layout

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Variant suffix sharing its base period's pool (v1 and v2 products).
const VARIANT_SUFFIX: &str = "_v2";

/// Name of the solved-keys file inside the keys directory.
pub const SOLVED_FILE_NAME: &str = "key_solved.txt";

/// A subscription-duration tag partitioning the inventory, e.g. `30d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period(String);

impl Period {
    /// Parse a period tag, folding the `_v2` variant onto its base pool.
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let base = tag.strip_suffix(VARIANT_SUFFIX).unwrap_or(tag);
        if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidPeriod(tag.to_string()));
        }
        Ok(Self(base.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::parse(s)
    }
}

/// Relative paths of the pool and solved files.
///
/// Remote mode uses these as repository paths; local mode joins them onto
/// the local root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    keys_dir: String,
}

impl KeyLayout {
    pub fn new(keys_dir: impl Into<String>) -> Self {
        let keys_dir = keys_dir.into();
        Self {
            keys_dir: keys_dir.trim_matches('/').to_string(),
        }
    }

    pub fn keys_dir(&self) -> &str {
        &self.keys_dir
    }

    /// `{keys_dir}/key{period}.txt`
    pub fn pool_path(&self, period: &Period) -> String {
        self.join(&format!("key{period}.txt"))
    }

    /// `{keys_dir}/key_solved.txt`
    pub fn solved_path(&self) -> String {
        self.join(SOLVED_FILE_NAME)
    }

    fn join(&self, file_name: &str) -> String {
        if self.keys_dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{file_name}", self.keys_dir)
        }
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("data/keys")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_tags() {
        for tag in ["1d", "7d", "30d", "90d"] {
            assert_eq!(Period::parse(tag).unwrap().as_str(), tag);
        }
    }

    #[test]
    fn v2_variant_shares_base_pool() {
        assert_eq!(Period::parse("30d_v2").unwrap(), Period::parse("30d").unwrap());
    }

    #[test]
    fn rejects_bad_tags() {
        for tag in ["", "   ", "_v2", "../etc", "1 d", "30d/x"] {
            assert!(
                matches!(Period::parse(tag), Err(Error::InvalidPeriod(_))),
                "{tag:?} should be rejected"
            );
        }
    }

    #[test]
    fn from_str_matches_parse() {
        let period: Period = "7d".parse().unwrap();
        assert_eq!(period.to_string(), "7d");
    }

    #[test]
    fn default_layout_paths() {
        let layout = KeyLayout::default();
        let period = Period::parse("1d").unwrap();
        assert_eq!(layout.pool_path(&period), "data/keys/key1d.txt");
        assert_eq!(layout.solved_path(), "data/keys/key_solved.txt");
    }

    #[test]
    fn layout_trims_slashes() {
        let layout = KeyLayout::new("/inventory/");
        let period = Period::parse("90d").unwrap();
        assert_eq!(layout.pool_path(&period), "inventory/key90d.txt");
    }

    #[test]
    fn empty_keys_dir_uses_bare_names() {
        let layout = KeyLayout::new("");
        assert_eq!(layout.solved_path(), "key_solved.txt");
    }
}
