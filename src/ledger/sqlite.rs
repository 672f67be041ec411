//! SQLite-backed record log.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::instrument;

use super::log::{KeepFn, RecordLog};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// For file-backed URLs, expand a leading `~/`, make sure the parent directory
/// exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded_path}?{query}")
}

/// One row per entry; storage order is the autoincrement id.
#[derive(Debug, Clone)]
pub struct SqliteLog {
    pool: Pool,
}

impl SqliteLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordLog for SqliteLog {
    #[instrument(skip_all)]
    async fn append(&self, entry: &str) -> Result<()> {
        sqlx::query("INSERT INTO sync_log (body) VALUES (?)")
            .bind(entry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn scan(&self) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT body FROM sync_log ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Deletes rejected rows by id, so rows appended after the scan are untouched.
    #[instrument(skip_all)]
    async fn compact(&self, keep: &KeepFn) -> Result<usize> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, body FROM sync_log ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        let doomed: Vec<i64> = rows
            .into_iter()
            .filter(|(_, body)| !keep(body))
            .map(|(id, _)| id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for id in &doomed {
            sqlx::query("DELETE FROM sync_log WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_log() -> SqliteLog {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteLog::new(pool)
    }

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_request_creation() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("ledger.db");
        let url = format!("sqlite://{}", path.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", path.display())
        );
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn append_scan_compact() {
        let log = setup_log().await;
        log.append(r#"{"a":1}"#).await.unwrap();
        log.append(r#"{"a":2}"#).await.unwrap();
        assert_eq!(
            log.scan().await.unwrap(),
            vec![r#"{"a":1}"#.to_string(), r#"{"a":2}"#.to_string()]
        );

        let removed = log.compact(&|body: &str| body.contains('2')).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(log.scan().await.unwrap(), vec![r#"{"a":2}"#.to_string()]);

        log.append(r#"{"a":3}"#).await.unwrap();
        assert_eq!(log.compact(&|_: &str| true).await.unwrap(), 0);
        assert_eq!(log.scan().await.unwrap().len(), 2);
    }
}
