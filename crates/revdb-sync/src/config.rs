use std::path::PathBuf;
use std::time::Duration;

use revdb_adapters::DEFAULT_SITE_ROOT;
use revdb_storage::{BackoffPolicy, HttpClientConfig, StoreConfig, TokenBucketConfig};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub workers: usize,
    pub http_timeout_secs: u64,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub user_agent: String,
    pub run_timeout_secs: Option<u64>,
    pub follow_artists: bool,
    pub site_root: String,
    /// Requests allowed in a burst before pacing kicks in. Unset disables pacing.
    pub rate_burst: Option<u32>,
    pub rate_refill_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            database_path: lookup("REVDB_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/reviews.db")),
            workers: parsed("REVDB_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(8)
                .max(1),
            http_timeout_secs: parsed("REVDB_HTTP_TIMEOUT_SECS").unwrap_or(20),
            max_retries: parsed("REVDB_MAX_RETRIES")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(3),
            backoff_base_ms: parsed("REVDB_BACKOFF_BASE_MS").unwrap_or(250),
            backoff_max_ms: parsed("REVDB_BACKOFF_MAX_MS").unwrap_or(5_000),
            user_agent: lookup("REVDB_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            run_timeout_secs: parsed("REVDB_RUN_TIMEOUT_SECS").filter(|secs| *secs > 0),
            follow_artists: lookup("REVDB_FOLLOW_ARTISTS")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(true),
            site_root: lookup("REVDB_SITE_ROOT").unwrap_or_else(|| DEFAULT_SITE_ROOT.to_string()),
            rate_burst: parsed("REVDB_RATE_BURST")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|burst| *burst > 0),
            rate_refill_ms: parsed("REVDB_RATE_REFILL_MS").unwrap_or(500),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::new(&self.database_path);
        config.max_connections = u32::try_from(self.workers + 2).unwrap_or(u32::MAX);
        config
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            token_bucket: self.rate_burst.map(|capacity| TokenBucketConfig {
                capacity,
                refill_every: Duration::from_millis(self.rate_refill_ms),
            }),
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = SyncConfig::default();
        assert_eq!(config.database_path, PathBuf::from("./data/reviews.db"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_retries, 3);
        assert!(config.follow_artists);
        assert_eq!(config.run_timeout(), None);
        assert!(config.http_config().token_bucket.is_none());
        assert_eq!(config.site_root, "https://pitchfork.com");
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = config_from(&[
            ("REVDB_WORKERS", "0"),
            ("REVDB_MAX_RETRIES", "not-a-number"),
            ("REVDB_RUN_TIMEOUT_SECS", "90"),
            ("REVDB_FOLLOW_ARTISTS", "false"),
            ("REVDB_BACKOFF_BASE_MS", "100"),
            ("REVDB_RATE_BURST", "4"),
        ]);
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(90)));
        assert!(!config.follow_artists);

        let http = config.http_config();
        assert_eq!(http.backoff.base_delay, Duration::from_millis(100));
        assert_eq!(http.backoff.max_attempts(), 4);
        assert_eq!(http.token_bucket.map(|b| b.capacity), Some(4));
        assert_eq!(config.store_config().max_connections, 3);
    }
}
