use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::StoreError;

/// A per-URL write transaction. Dropping it without `commit` rolls everything back.
pub type WriteTx = Transaction<'static, Sqlite>;

/// Tables reported by `revdb report`, in schema order.
pub const TABLES: &[&str] = &[
    "urls",
    "reviews",
    "albums",
    "artists",
    "authors",
    "author_bios",
    "author_types",
    "author_role_versions",
    "labels",
    "genres",
    "keywords",
    "entities",
    "review_albums",
    "review_authors",
    "review_artists",
    "review_labels",
    "review_keywords",
    "review_entities",
    "review_artist_genres",
    "scraping_events",
];

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a writer waits on SQLite's lock before giving up.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file and apply pending migrations.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::Unavailable(sqlx::Error::Io(err)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.busy_timeout)
            .connect_with(options)
            .await
            .map_err(StoreError::Unavailable)?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %config.path.display(), "store opened");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction for one URL's write set. Failure here means the store is gone.
    pub async fn begin(&self) -> Result<WriteTx, StoreError> {
        self.pool.begin().await.map_err(StoreError::Unavailable)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let table = TABLES
            .iter()
            .find(|t| **t == table)
            .ok_or_else(|| StoreError::Sql(sqlx::Error::Protocol(format!("unknown table {table}"))))?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>, StoreError> {
        let mut out = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            out.push((*table, self.count_rows(table).await?));
        }
        Ok(out)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
