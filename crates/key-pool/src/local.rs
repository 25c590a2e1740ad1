//! Local-disk key store
//!
//! Same file layout and text format as the repository backend, rooted at a
//! local directory. Writes go through a temp file and rename. There is no
//! version check, so this backend assumes a single writer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::keyfile::{append_key, key_hint, parse_keys, remove_key, take_first, validate_key};
use crate::period::{KeyLayout, Period};
use crate::store::{BoxFuture, DeleteOutcome, KeyStore};

pub struct LocalKeyStore {
    root: PathBuf,
    layout: KeyLayout,
    periods: Vec<Period>,
}

impl LocalKeyStore {
    pub fn new(root: impl Into<PathBuf>, layout: KeyLayout, periods: Vec<Period>) -> Self {
        let root = root.into();
        info!(
            root = %root.display(),
            keys_dir = layout.keys_dir(),
            periods = periods.len(),
            "local key store initialized"
        );
        Self {
            root,
            layout,
            periods,
        }
    }

    fn pool_file(&self, period: &Period) -> PathBuf {
        self.root.join(self.layout.pool_path(period))
    }

    fn solved_file(&self) -> PathBuf {
        self.root.join(self.layout.solved_path())
    }

    async fn list(&self, period: &Period) -> Result<Vec<String>> {
        let text = read_text(&self.pool_file(period)).await?;
        Ok(text.map(|t| parse_keys(&t)).unwrap_or_default())
    }

    async fn reserve(&self, period: &Period) -> Result<String> {
        let path = self.pool_file(period);
        let text = read_text(&path).await?.unwrap_or_default();

        let Some((key, rest)) = take_first(&text) else {
            warn!(period = %period, "no keys left to dispense");
            metrics::counter!("keydrop_pool_empty_total", "period" => period.to_string())
                .increment(1);
            return Err(Error::PoolEmpty(period.to_string()));
        };

        write_atomic(&path, &rest).await?;
        info!(period = %period, key = %key_hint(&key), "key removed from pool");

        if let Err(e) = self.record_solved(&key).await {
            error!(
                period = %period,
                key = %key,
                error = %e,
                "key removed from pool but not recorded as solved"
            );
            return Err(e);
        }

        metrics::counter!(
            "keydrop_keys_dispensed_total",
            "period" => period.to_string(),
            "backend" => "local"
        )
        .increment(1);
        Ok(key)
    }

    async fn add(&self, period: &Period, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        let path = self.pool_file(period);
        let text = read_text(&path)
            .await?
            .ok_or_else(|| Error::PoolMissing(period.to_string()))?;

        write_atomic(&path, &append_key(&text, &key)).await?;
        info!(period = %period, key = %key_hint(&key), "key added to pool");
        Ok(())
    }

    async fn delete_and_save(&self, key: &str) -> Result<DeleteOutcome> {
        let key = key.trim();

        for period in &self.periods {
            let path = self.pool_file(period);
            let Some(text) = read_text(&path).await? else {
                debug!(path = %path.display(), "pool file missing");
                continue;
            };
            let Some(rest) = remove_key(&text, key) else {
                continue;
            };

            write_atomic(&path, &rest).await?;
            info!(period = %period, key = %key_hint(key), "key removed from pool");
            self.record_solved(key).await?;
            return Ok(DeleteOutcome::Moved {
                period: period.clone(),
            });
        }

        info!(key = %key_hint(key), "key not found in any pool, nothing to move");
        Ok(DeleteOutcome::NotInAnyPool)
    }

    async fn record_solved(&self, key: &str) -> Result<()> {
        let path = self.solved_file();
        let text = read_text(&path).await?.unwrap_or_default();
        write_atomic(&path, &append_key(&text, key)).await?;
        debug!(key = %key_hint(key), "key recorded as solved");
        Ok(())
    }
}

impl KeyStore for LocalKeyStore {
    fn backend(&self) -> &str {
        "local"
    }

    fn periods(&self) -> &[Period] {
        &self.periods
    }

    fn list_keys<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.list(period))
    }

    fn reserve_and_consume_key<'a>(&'a self, period: &'a Period) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.reserve(period))
    }

    fn add_key<'a>(&'a self, period: &'a Period, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.add(period, key))
    }

    fn delete_key_and_save_solved<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<DeleteOutcome>> {
        Box::pin(self.delete_and_save(key))
    }

    fn list_solved(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let text = read_text(&self.solved_file()).await?;
            Ok(text.map(|t| parse_keys(&t)).unwrap_or_default())
        })
    }
}

/// Read a UTF-8 file; `None` when it does not exist.
async fn read_text(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(format!("reading {}: {e}", path.display()))),
    }
}

/// Replace `path` with `content` via temp file and rename.
///
/// The file ends up with 0600 permissions on unix. Missing parent directories
/// are created.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io(format!("{} has no parent directory", path.display())))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("keys");
    let tmp_path = dir.join(format!(".{name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, content.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting key file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp key file: {e}")))?;

    debug!(path = %path.display(), "persisted key file");
    Ok(())
}
