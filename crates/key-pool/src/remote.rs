//! Repository-backed key store
//!
//! Every mutation is a read-modify-write through `ContentsClient`, so a
//! concurrent dispense for the same period loses its compare-and-swap, re-reads
//! the pool and takes whatever key is now first. There is no in-process lock;
//! the remote version check is the only serialization.

use repo_contents::{ContentsClient, Edit};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::keyfile::{append_key, key_hint, parse_keys, remove_key, take_first, validate_key};
use crate::period::{KeyLayout, Period};
use crate::store::{BoxFuture, DeleteOutcome, KeyStore};

pub struct RemoteKeyStore {
    client: ContentsClient,
    layout: KeyLayout,
    periods: Vec<Period>,
}

impl RemoteKeyStore {
    pub fn new(client: ContentsClient, layout: KeyLayout, periods: Vec<Period>) -> Self {
        info!(
            repository = %client.repository(),
            keys_dir = layout.keys_dir(),
            periods = periods.len(),
            "remote key store initialized"
        );
        Self {
            client,
            layout,
            periods,
        }
    }

    /// Read a file as a key list; a missing file reads as empty.
    async fn read_keys(&self, path: &str) -> Result<Vec<String>> {
        match self.client.read_file(path).await {
            Ok(file) => Ok(parse_keys(&file.content)),
            Err(repo_contents::Error::NotFound(_)) => {
                debug!(path, "file missing, treating as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, period: &Period) -> Result<Vec<String>> {
        self.read_keys(&self.layout.pool_path(period)).await
    }

    async fn reserve(&self, period: &Period) -> Result<String> {
        let path = self.layout.pool_path(period);
        let message = format!("Dispense {period} key");

        let taken = self
            .client
            .update_file(&path, &message, |text| match take_first(text) {
                Some((key, rest)) => Edit::Write {
                    content: rest,
                    value: Some(key),
                },
                None => Edit::Keep(None),
            })
            .await;

        let key = match taken {
            Ok(Some(key)) => key,
            Ok(None) | Err(repo_contents::Error::NotFound(_)) => {
                warn!(period = %period, "no keys left to dispense");
                metrics::counter!("keydrop_pool_empty_total", "period" => period.to_string())
                    .increment(1);
                return Err(Error::PoolEmpty(period.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        info!(period = %period, key = %key_hint(&key), "key removed from pool");

        if let Err(e) = self.record_solved(&key).await {
            // The pool write already landed; only an operator can reconcile this.
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
            "backend" => "github"
        )
        .increment(1);
        Ok(key)
    }

    async fn add(&self, period: &Period, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        let path = self.layout.pool_path(period);
        let message = format!("Add {period} key");

        match self
            .client
            .update_file(&path, &message, |text| Edit::Write {
                content: append_key(text, &key),
                value: (),
            })
            .await
        {
            Ok(()) => {
                info!(period = %period, key = %key_hint(&key), "key added to pool");
                Ok(())
            }
            Err(repo_contents::Error::NotFound(_)) => Err(Error::PoolMissing(period.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_and_save(&self, key: &str) -> Result<DeleteOutcome> {
        let key = key.trim();

        for period in &self.periods {
            let path = self.layout.pool_path(period);
            let removed = self
                .client
                .update_file(&path, "Remove key", |text| match remove_key(text, key) {
                    Some(rest) => Edit::Write {
                        content: rest,
                        value: true,
                    },
                    None => Edit::Keep(false),
                })
                .await;

            match removed {
                Ok(true) => {
                    info!(period = %period, key = %key_hint(key), "key removed from pool");
                    self.record_solved(key).await?;
                    return Ok(DeleteOutcome::Moved {
                        period: period.clone(),
                    });
                }
                Ok(false) => debug!(path = %path, "key not in pool"),
                Err(repo_contents::Error::NotFound(_)) => debug!(path = %path, "pool file missing"),
                Err(e) => return Err(e.into()),
            }
        }

        info!(key = %key_hint(key), "key not found in any pool, nothing to move");
        Ok(DeleteOutcome::NotInAnyPool)
    }

    /// Append to the solved file, creating it on first use.
    async fn record_solved(&self, key: &str) -> Result<()> {
        self.client
            .upsert_file(&self.layout.solved_path(), "Add solved key", |text| {
                Edit::Write {
                    content: append_key(text, key),
                    value: (),
                }
            })
            .await?;
        debug!(key = %key_hint(key), "key recorded as solved");
        Ok(())
    }
}

impl KeyStore for RemoteKeyStore {
    fn backend(&self) -> &str {
        "github"
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
        Box::pin(async move { self.read_keys(&self.layout.solved_path()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_contents::RetryPolicy;
    use repo_contents::mock::MockRepo;
    use std::time::Duration;

    const TOKEN: &str = "ghp_test_token";
    const POOL_1D: &str = "data/keys/key1d.txt";
    const POOL_30D: &str = "data/keys/key30d.txt";
    const SOLVED: &str = "data/keys/key_solved.txt";

    fn periods() -> Vec<Period> {
        ["1d", "7d", "30d", "90d"]
            .into_iter()
            .map(|p| Period::parse(p).unwrap())
            .collect()
    }

    fn period(tag: &str) -> Period {
        Period::parse(tag).unwrap()
    }

    fn store_with_token(repo: &MockRepo, token: &str) -> RemoteKeyStore {
        let retry = RetryPolicy {
            max_transient_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_conflict_attempts: 3,
        };
        RemoteKeyStore::new(repo.client(token, retry), KeyLayout::default(), periods())
    }

    fn store(repo: &MockRepo) -> RemoteKeyStore {
        store_with_token(repo, TOKEN)
    }

    #[tokio::test]
    async fn reserve_moves_head_to_solved() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\nK2\nK3\n");
        repo.seed(SOLVED, "");
        let store = store(&repo);

        let key = store.reserve_and_consume_key(&period("1d")).await.unwrap();

        assert_eq!(key, "K1");
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("K2\nK3\n"));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("K1\n"));
        assert_eq!(
            repo.commit_messages(),
            vec!["Dispense 1d key", "Add solved key"],
            "pool write must land before the solved write"
        );
    }

    #[tokio::test]
    async fn reserve_creates_missing_solved_file() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\n");
        let store = store(&repo);

        store.reserve_and_consume_key(&period("1d")).await.unwrap();

        assert_eq!(repo.file(POOL_1D).as_deref(), Some(""));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("K1\n"));
    }

    #[tokio::test]
    async fn reserve_on_empty_pool_leaves_solved_alone() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "\n");
        repo.seed(SOLVED, "OLD\n");
        let store = store(&repo);

        let err = store.reserve_and_consume_key(&period("1d")).await.unwrap_err();

        assert!(matches!(err, Error::PoolEmpty(ref p) if p == "1d"), "got: {err}");
        assert_eq!(repo.file(SOLVED).as_deref(), Some("OLD\n"));
        assert!(repo.commit_messages().is_empty());
    }

    #[tokio::test]
    async fn reserve_on_missing_pool_is_pool_empty() {
        let repo = MockRepo::start(TOKEN).await;
        let store = store(&repo);

        let err = store.reserve_and_consume_key(&period("90d")).await.unwrap_err();

        assert!(matches!(err, Error::PoolEmpty(_)), "got: {err}");
        assert!(repo.file(SOLVED).is_none());
    }

    #[tokio::test]
    async fn losing_a_race_dispenses_the_next_key() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\nK2\nK3\n");
        repo.seed(SOLVED, "");
        // Another buyer takes K1 between our read and our write
        repo.queue_concurrent_edit(POOL_1D, "K2\nK3\n");
        repo.queue_concurrent_edit(SOLVED, "K1\n");
        let store = store(&repo);

        let key = store.reserve_and_consume_key(&period("1d")).await.unwrap();

        assert_eq!(key, "K2", "the loser must re-read and take the new head");
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("K3\n"));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("K1\nK2\n"));
    }

    #[tokio::test]
    async fn concurrent_dispenses_never_share_a_key() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\nK2\nK3\nK4\n");
        repo.seed(SOLVED, "");
        let store = std::sync::Arc::new(RemoteKeyStore::new(
            repo.client(
                TOKEN,
                RetryPolicy {
                    max_transient_attempts: 3,
                    base_backoff: Duration::from_millis(1),
                    max_conflict_attempts: 10,
                },
            ),
            KeyLayout::default(),
            periods(),
        ));

        let mut handles = vec![];
        for _ in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.reserve_and_consume_key(&period("1d")).await
            }));
        }
        let mut keys = vec![];
        for h in handles {
            keys.push(h.await.unwrap().unwrap());
        }
        keys.sort();

        assert_eq!(keys, vec!["K1", "K2"]);
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("K3\nK4\n"));
        let mut solved = parse_keys(&repo.file(SOLVED).unwrap());
        solved.sort();
        assert_eq!(solved, vec!["K1", "K2"]);
    }

    #[tokio::test]
    async fn solved_write_failure_leaves_key_out_of_both_files() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\nK2\n");
        repo.seed(SOLVED, "");
        for _ in 0..3 {
            repo.queue_concurrent_edit(SOLVED, "OTHER\n");
        }
        let store = store(&repo);

        let err = store.reserve_and_consume_key(&period("1d")).await.unwrap_err();

        assert!(
            matches!(
                err,
                Error::Remote(repo_contents::Error::ConflictRetriesExhausted { .. })
            ),
            "got: {err}"
        );
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("K2\n"));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("OTHER\n"));
    }

    #[tokio::test]
    async fn auth_failure_propagates() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\n");
        let store = store_with_token(&repo, "ghp_expired");

        let err = store.list_keys(&period("1d")).await.unwrap_err();

        assert!(
            matches!(err, Error::Remote(repo_contents::Error::Auth(_))),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn list_missing_pool_is_empty() {
        let repo = MockRepo::start(TOKEN).await;
        let store = store(&repo);

        assert!(store.list_keys(&period("7d")).await.unwrap().is_empty());
        assert!(store.list_solved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_appends_at_tail() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_30D, "A\nB\n");
        let store = store(&repo);

        store.add_key(&period("30d"), " C ").await.unwrap();

        assert_eq!(store.list_keys(&period("30d")).await.unwrap(), vec!["A", "B", "C"]);
        assert_eq!(repo.commit_messages(), vec!["Add 30d key"]);
    }

    #[tokio::test]
    async fn add_does_not_dedup() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_30D, "A\n");
        let store = store(&repo);

        store.add_key(&period("30d"), "A").await.unwrap();

        assert_eq!(repo.file(POOL_30D).as_deref(), Some("A\nA\n"));
    }

    #[tokio::test]
    async fn add_to_missing_pool_fails() {
        let repo = MockRepo::start(TOKEN).await;
        let store = store(&repo);

        let err = store.add_key(&period("30d"), "A").await.unwrap_err();

        assert!(matches!(err, Error::PoolMissing(_)), "got: {err}");
        assert!(repo.file(POOL_30D).is_none());
    }

    #[tokio::test]
    async fn add_rejects_blank_key() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_30D, "A\n");
        let store = store(&repo);

        let err = store.add_key(&period("30d"), "  ").await.unwrap_err();

        assert!(matches!(err, Error::InvalidKey(_)), "got: {err}");
        assert_eq!(repo.request_count(), 0);
    }

    #[tokio::test]
    async fn delete_moves_key_from_the_pool_holding_it() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "A\nB\n");
        repo.seed(POOL_30D, "X\nY\n");
        repo.seed(SOLVED, "OLD\n");
        let store = store(&repo);

        let outcome = store.delete_key_and_save_solved("Y").await.unwrap();

        assert_eq!(
            outcome,
            DeleteOutcome::Moved {
                period: period("30d")
            }
        );
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("A\nB\n"));
        assert_eq!(repo.file(POOL_30D).as_deref(), Some("X\n"));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("OLD\nY\n"));
    }

    #[tokio::test]
    async fn delete_absent_key_writes_nothing() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "A\nB\n");
        repo.seed(SOLVED, "OLD\n");
        let store = store(&repo);

        let outcome = store.delete_key_and_save_solved("ZZZ").await.unwrap();

        assert_eq!(outcome, DeleteOutcome::NotInAnyPool);
        assert_eq!(repo.file(POOL_1D).as_deref(), Some("A\nB\n"));
        assert_eq!(repo.file(SOLVED).as_deref(), Some("OLD\n"));
        assert!(repo.commit_messages().is_empty());
    }

    #[tokio::test]
    async fn peek_and_count_do_not_mutate() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\nK2\n");
        let store = store(&repo);

        assert_eq!(store.peek_key(&period("1d")).await.unwrap().as_deref(), Some("K1"));
        assert_eq!(store.count_keys(&period("1d")).await.unwrap(), 2);
        assert_eq!(store.peek_key(&period("7d")).await.unwrap(), None);
        assert!(repo.commit_messages().is_empty());
    }

    #[tokio::test]
    async fn transient_read_during_reserve_is_retried() {
        let repo = MockRepo::start(TOKEN).await;
        repo.seed(POOL_1D, "K1\n");
        repo.seed(SOLVED, "");
        repo.fail_next_requests(1);
        let store = store(&repo);

        let key = store.reserve_and_consume_key(&period("1d")).await.unwrap();

        assert_eq!(key, "K1");
        assert_eq!(repo.file(SOLVED).as_deref(), Some("K1\n"));
    }
}
