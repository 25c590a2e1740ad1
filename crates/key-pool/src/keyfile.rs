//! Text format of pool and solved files
//!
//! One key per line, in offer order. Reading trims lines and skips blanks;
//! writing joins with `\n` and ends with a single trailing newline unless the
//! file is empty. The edits below are pure so both backends share them.

use crate::error::{Error, Result};

/// Parse file text into an ordered key list.
pub fn parse_keys(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Render an ordered key list back into file text.
pub fn render_keys(keys: &[String]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let mut text = keys.join("\n");
    text.push('\n');
    text
}

/// Normalize a key supplied by an operator.
pub fn validate_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if key.contains(['\n', '\r']) {
        return Err(Error::InvalidKey("key spans multiple lines".into()));
    }
    Ok(key.to_string())
}

/// Split off the head of the pool: `(key, remaining text)`.
pub fn take_first(text: &str) -> Option<(String, String)> {
    let mut keys = parse_keys(text);
    if keys.is_empty() {
        return None;
    }
    let key = keys.remove(0);
    Some((key, render_keys(&keys)))
}

/// Remove every line equal to `key`; `None` when the key is absent.
pub fn remove_key(text: &str, key: &str) -> Option<String> {
    let keys = parse_keys(text);
    if !keys.iter().any(|k| k == key) {
        return None;
    }
    let remaining: Vec<String> = keys.into_iter().filter(|k| k != key).collect();
    Some(render_keys(&remaining))
}

/// Append `key` at the tail.
pub fn append_key(text: &str, key: &str) -> String {
    let mut keys = parse_keys(text);
    keys.push(key.to_string());
    render_keys(&keys)
}

/// Short prefix of a key for routine log lines.
pub fn key_hint(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}***")
}
