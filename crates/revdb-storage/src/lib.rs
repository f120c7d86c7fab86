//! SQLite-backed review archive plus the HTTP page fetcher.
//!
//! Everything that touches the network or the database lives here: the retrying
//! [`HttpFetcher`], natural-key [`resolver`], idempotent relationship [`links`],
//! the append-only author [`roles`] history and the scraping [`events`] ledger.

pub mod events;
pub mod fetch;
pub mod links;
pub mod persist;
pub mod resolver;
pub mod roles;
mod store;

pub use events::{EventLog, ScrapingEvent, StepStats};
pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedPage,
    HttpClientConfig, HttpFetcher, PageFetcher, RetryDisposition, SimpleTokenBucket,
    TokenBucketConfig,
};
pub use links::{Link, LinkOutcome};
pub use persist::PersistOutcome;
pub use resolver::Resolved;
pub use roles::{RoleChange, RoleVersion};
pub use store::{Store, StoreConfig, WriteTx, TABLES};

use thiserror::Error;

use revdb_core::EntityKind;

pub const CRATE_NAME: &str = "revdb-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened or a connection/transaction could not be obtained.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("resolution conflict for {kind} `{key}`")]
    ResolutionConflict { kind: EntityKind, key: String },
    #[error("empty natural key for {kind}")]
    EmptyKey { kind: EntityKind },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored timestamp `{0}`")]
    Timestamp(String),
}

impl StoreError {
    /// Fatal errors halt the whole run; everything else is local to one URL.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::ResolutionConflict { .. } | StoreError::Migrate(_)
        )
    }
}

pub(crate) fn parse_timestamp(text: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|_| StoreError::Timestamp(text.to_string()))
}
