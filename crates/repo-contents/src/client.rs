//! Contents API client with optimistic-concurrency updates
//!
//! `read_file` returns the decoded text together with the store's version
//! token. `write_file` sends the new text plus the token it was derived from;
//! the store compares the token against the file's current version and
//! rejects the write on mismatch. That rejection is the only thing keeping two
//! concurrent edits of the same file from losing one another.

use std::future::Future;
use std::time::Duration;

use common::Secret;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{decode_content, encode_content};
use crate::constants::{ACCEPT, API_VERSION, USER_AGENT};
use crate::error::{Error, Result};
use crate::status::{Operation, classify_status, classify_transport};

/// Repository coordinates and credentials.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// API root, e.g. `https://api.github.com`
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Branch to read and commit to; the repository default when `None`
    pub branch: Option<String>,
    pub token: Secret<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Bounds for the two retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for a single request that fails transiently
    pub max_transient_attempts: u32,
    /// Delay before the first transient retry; doubles on each further retry
    pub base_backoff: Duration,
    /// Total read-modify-write cycles before giving up on version conflicts
    pub max_conflict_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_conflict_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor)
    }
}

/// The current remote version of a file.
///
/// `sha` is the version token that must accompany a write based on `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub sha: String,
}

/// Outcome of an edit function inside the read-modify-write loop.
#[derive(Debug)]
pub enum Edit<T> {
    /// Replace the file with `content` and return `value` once written
    Write { content: String, value: T },
    /// Nothing to write; return `value` immediately
    Keep(T),
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

/// Authenticated client for one repository's contents endpoint.
pub struct ContentsClient {
    http: reqwest::Client,
    config: RepoConfig,
    retry: RetryPolicy,
}

impl ContentsClient {
    pub fn new(http: reqwest::Client, config: RepoConfig, retry: RetryPolicy) -> Self {
        Self {
            http,
            config,
            retry,
        }
    }

    /// `owner/repo`, for logs and health output.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.config.owner, self.config.repo)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetch a file's text and version token.
    ///
    /// Transient failures are retried with backoff. `NotFound` and `Auth` are
    /// returned immediately.
    pub async fn read_file(&self, path: &str) -> Result<RemoteFile> {
        self.with_retry("read", path, Error::is_transient, move || self.read_once(path))
            .await
    }

    /// Overwrite a file, conditional on `sha` still being its current version.
    ///
    /// Returns the new version token. A stale `sha` yields `VersionConflict`
    /// and leaves the remote file untouched.
    ///
    /// Only failures that never reached the store are retried here. A timeout
    /// may hide a write that landed, and replaying it would turn into a
    /// conflict that makes the caller apply its edit twice.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        sha: &str,
        message: &str,
    ) -> Result<String> {
        self.with_retry(
            "write",
            path,
            |e| matches!(e, Error::Unreachable(_)),
            move || self.put_once(path, content, Some(sha), message),
        )
        .await
    }

    /// Create a file that does not exist yet.
    ///
    /// The store answers `VersionConflict` if the path already exists.
    pub async fn create_file(&self, path: &str, content: &str, message: &str) -> Result<String> {
        self.with_retry(
            "create",
            path,
            |e| matches!(e, Error::Unreachable(_)),
            move || self.put_once(path, content, None, message),
        )
        .await
    }

    /// Run a bounded read-modify-write loop on an existing file.
    ///
    /// `edit` sees the current text on every attempt, so after a conflict it
    /// recomputes its change against whatever the winning writer left behind.
    pub async fn update_file<T, F>(&self, path: &str, message: &str, edit: F) -> Result<T>
    where
        F: FnMut(&str) -> Edit<T>,
    {
        self.edit_loop(path, message, false, edit).await
    }

    /// Like `update_file`, but a missing file is edited as empty text and
    /// then created.
    pub async fn upsert_file<T, F>(&self, path: &str, message: &str, edit: F) -> Result<T>
    where
        F: FnMut(&str) -> Edit<T>,
    {
        self.edit_loop(path, message, true, edit).await
    }

    async fn edit_loop<T, F>(
        &self,
        path: &str,
        message: &str,
        create_missing: bool,
        mut edit: F,
    ) -> Result<T>
    where
        F: FnMut(&str) -> Edit<T>,
    {
        let max_attempts = self.retry.max_conflict_attempts.max(1);

        for attempt in 1..=max_attempts {
            let current = match self.read_file(path).await {
                Ok(file) => Some(file),
                Err(Error::NotFound(_)) if create_missing => None,
                Err(e) => return Err(e),
            };
            let text = current.as_ref().map_or("", |file| file.content.as_str());

            let (content, value) = match edit(text) {
                Edit::Keep(value) => return Ok(value),
                Edit::Write { content, value } => (content, value),
            };

            let written = match &current {
                Some(file) => self.write_file(path, &content, &file.sha, message).await,
                None => self.create_file(path, &content, message).await,
            };

            match written {
                Ok(_) => return Ok(value),
                Err(Error::VersionConflict(detail)) => {
                    warn!(
                        path,
                        attempt,
                        max_attempts,
                        error = %detail,
                        "version conflict, redoing read-modify-write"
                    );
                    metrics::counter!("keydrop_remote_retries_total", "reason" => "conflict")
                        .increment(1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ConflictRetriesExhausted {
            path: path.to_string(),
            attempts: max_attempts,
        })
    }

    /// Retry `call` with exponential backoff while `retryable` holds.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        path: &str,
        retryable: impl Fn(&Error) -> bool,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_transient_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        op,
                        path,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote call failed, retrying"
                    );
                    metrics::counter!("keydrop_remote_retries_total", "reason" => "transient")
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn read_once(&self, path: &str) -> Result<RemoteFile> {
        let mut url = self.contents_url(path);
        if let Some(branch) = &self.config.branch {
            url.push_str("?ref=");
            url.push_str(branch);
        }

        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| classify_transport(&e, path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(classify_status(Operation::Read, status.as_u16(), path, &body));
        }

        let payload: ContentsResponse = response
            .json()
            .await
            .map_err(|e| Error::Unexpected(format!("invalid contents response for {path}: {e}")))?;

        if let Some(encoding) = payload.encoding.as_deref() {
            if encoding != "base64" {
                return Err(Error::Unexpected(format!(
                    "{path} served with unsupported encoding {encoding:?}"
                )));
            }
        }

        let content = decode_content(&payload.content)?;
        debug!(path, sha = %payload.sha, bytes = content.len(), "read remote file");

        Ok(RemoteFile {
            path: path.to_string(),
            content,
            sha: payload.sha,
        })
    }

    async fn put_once(
        &self,
        path: &str,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<String> {
        let body = WriteRequest {
            message,
            content: encode_content(content),
            sha,
            branch: self.config.branch.as_deref(),
        };

        let response = self
            .request(Method::PUT, &self.contents_url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e, path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(classify_status(Operation::Write, status.as_u16(), path, &body));
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| Error::Unexpected(format!("invalid write response for {path}: {e}")))?;

        info!(path, sha = %written.content.sha, created = sha.is_none(), "wrote remote file");
        Ok(written.content.sha)
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path.trim_start_matches('/'),
        )
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", self.config.token.expose()),
            )
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .timeout(self.config.timeout)
    }
}
