//! Run orchestration: configuration, seeds, the shared work queue and the worker pool.

mod config;
mod pipeline;
mod queue;
mod seeds;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use revdb_adapters::SiteExtractor;
use revdb_core::PageTarget;
use revdb_storage::{EventLog, HttpFetcher, StepStats, Store, StoreError};

pub use config::SyncConfig;
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use queue::{Claim, WorkQueue};
pub use seeds::{load_seed_file, parse_seed_file, seed_from_url, yearly_sitemaps};

pub const CRATE_NAME: &str = "revdb-sync";

/// A run that could not continue. Per-page failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run {run_id} halted after {processed} page(s): {source}")]
    Fatal {
        run_id: Uuid,
        processed: usize,
        #[source]
        source: StoreError,
    },
}

impl From<&SyncConfig> for RunOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            workers: config.workers,
            run_timeout: config.run_timeout(),
            follow_artists: config.follow_artists,
        }
    }
}

/// Open the store and wire the live fetcher and site extractor.
pub async fn build_pipeline(config: &SyncConfig) -> Result<Pipeline> {
    let store = Store::open(&config.store_config())
        .await
        .with_context(|| format!("opening store at {}", config.database_path.display()))?;
    let fetcher = HttpFetcher::new(config.http_config())?;
    let extractor = SiteExtractor::new(&config.site_root)
        .with_context(|| format!("invalid site root {}", config.site_root))?;
    Ok(Pipeline::new(
        store,
        Arc::new(fetcher),
        Arc::new(extractor),
        RunOptions::from(config),
    ))
}

/// Every URL whose latest recorded step failed.
pub async fn retry_seeds(store: &Store) -> Result<Vec<PageTarget>, StoreError> {
    EventLog::new(store.pool().clone()).failed_targets().await
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub steps: Vec<StepStats>,
    pub tables: Vec<(&'static str, i64)>,
    pub retry_candidates: usize,
}

pub async fn audit_report(store: &Store) -> Result<AuditReport, StoreError> {
    let events = EventLog::new(store.pool().clone());
    Ok(AuditReport {
        steps: events.step_stats().await?,
        tables: store.table_counts().await?,
        retry_candidates: events.failed_targets().await?.len(),
    })
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Scrape Audit\n")?;
        writeln!(f, "## Steps")?;
        if self.steps.is_empty() {
            writeln!(f, "- no events recorded")?;
        }
        for step in &self.steps {
            writeln!(f, "- {}: {} ok, {} failed", step.process, step.succeeded, step.failed)?;
        }
        writeln!(f, "\n## Tables")?;
        for (table, count) in &self.tables {
            writeln!(f, "- {table}: {count}")?;
        }
        write!(f, "\nURLs awaiting retry: {}", self.retry_candidates)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} processed ({} ok, {} failed), {} discovered in {}s",
            self.run_id,
            self.processed,
            self.succeeded,
            self.failed,
            self.discovered,
            (self.finished_at - self.started_at).num_seconds()
        )?;
        if let Some(reason) = &self.halted_reason {
            write!(f, "; halted: {reason}")?;
        }
        Ok(())
    }
}
