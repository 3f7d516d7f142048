use std::{future::Future, path::Path, time::Duration};

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{info, warn};

const STORE_ATTEMPTS: u32 = 3;
const STORE_BACKOFF: Duration = Duration::from_millis(50);

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
}

/// Open (creating if needed) the SQLite store at `path`.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }
    let db = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(connect_options(path))
        .await
        .with_context(|| format!("open database {}", path.display()))?;
    info!(path = %path.display(), "credential store opened");
    Ok(db)
}

/// A pool that only touches the file when first used. Used by tests that
/// need an unreachable store.
pub fn connect_lazy(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(false),
        )
}

/// Busy, locked, pool exhaustion and I/O errors are worth another try.
pub fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|c| matches!(c & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

/// Run a store operation, retrying transient failures a few times.
pub async fn with_retry<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(e) if attempt < STORE_ATTEMPTS && is_transient(&e) => {
                warn!(op, attempt, error = %e, "transient store error; retrying");
                tokio::time::sleep(STORE_BACKOFF * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_then_gives_up() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), STORE_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(matches!(res, Err(sqlx::Error::RowNotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.db");
        let db = connect(&path).await.expect("connect");
        sqlx::query("SELECT 1").execute(&db).await.unwrap();
        assert!(path.exists());
    }
}
