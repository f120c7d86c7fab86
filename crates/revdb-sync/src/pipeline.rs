use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use revdb_adapters::Extractor;
use revdb_core::{PageClass, PageRecord, PageTarget, ScrapeStep};
use revdb_storage::{EventLog, PageFetcher, Store, StoreError};

use crate::queue::WorkQueue;
use crate::PipelineError;

/// Knobs the pipeline itself reads; the rest of [`crate::SyncConfig`] goes to the fetcher and store.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub workers: usize,
    pub run_timeout: Option<Duration>,
    pub follow_artists: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            run_timeout: None,
            follow_artists: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Targets enqueued by pages processed during the run (seeds excluded).
    pub discovered: usize,
    pub halted_reason: Option<String>,
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    discovered: AtomicUsize,
    fatal: Mutex<Option<StoreError>>,
}

impl RunCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set_fatal(&self, err: StoreError) {
        let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_fatal(&self) -> Option<StoreError> {
        self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// How one page ended. Only `Fatal` reaches beyond the page.
#[derive(Debug)]
enum PageOutcome {
    Done { follow_ups: Vec<PageTarget> },
    Failed(ScrapeStep),
    Fatal(StoreError),
}

/// Fetch → extract → persist for every reachable page, `workers` at a time.
#[derive(Clone)]
pub struct Pipeline {
    store: Store,
    events: EventLog,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        store: Store,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        options: RunOptions,
    ) -> Self {
        let events = EventLog::new(store.pool().clone());
        Self {
            store,
            events,
            fetcher,
            extractor,
            options,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn run(&self, seeds: Vec<PageTarget>) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let workers = self.options.workers.max(1);

        let queue = Arc::new(WorkQueue::new());
        let seeded = seeds
            .into_iter()
            .filter(|seed| seed.class.is_fetchable())
            .filter(|seed| queue.push(seed.clone()))
            .count();
        info!(%run_id, seeded, workers, "run started");

        let timer = self.options.run_timeout.map(|limit| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let dropped = queue.halt(format!("run timeout after {limit:?}"));
                warn!(dropped, "run timeout reached; draining in-flight pages");
            })
        });

        let counters = Arc::new(RunCounters::default());
        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            let this = self.clone();
            let queue = Arc::clone(&queue);
            let counters = Arc::clone(&counters);
            join_set.spawn(async move { this.work(worker, run_id, &queue, &counters).await });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                error!(%run_id, error = %err, "worker task failed");
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            processed: counters.processed.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            discovered: counters.discovered.load(Ordering::Relaxed),
            halted_reason: queue.halted_reason(),
        };

        if let Some(source) = counters.take_fatal() {
            error!(%run_id, processed = summary.processed, error = %source, "run halted on store failure");
            return Err(PipelineError::Fatal {
                run_id,
                processed: summary.processed,
                source,
            });
        }
        info!(
            %run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            discovered = summary.discovered,
            halted = summary.halted_reason.as_deref().unwrap_or("no"),
            "run finished"
        );
        Ok(summary)
    }

    async fn work(&self, worker: usize, run_id: Uuid, queue: &WorkQueue, counters: &RunCounters) {
        while let Some(claim) = queue.next().await {
            let target = claim.target();
            let span = info_span!("page", worker, url = %target.url, classification = %target.class);
            let outcome = self.process(run_id, target).instrument(span).await;
            RunCounters::bump(&counters.processed);

            match outcome {
                PageOutcome::Done { follow_ups } => {
                    RunCounters::bump(&counters.succeeded);
                    for next in follow_ups {
                        if queue.push(next) {
                            RunCounters::bump(&counters.discovered);
                        }
                    }
                }
                PageOutcome::Failed(step) => {
                    RunCounters::bump(&counters.failed);
                    debug!(url = %target.url, %step, "page failed");
                }
                PageOutcome::Fatal(err) => {
                    RunCounters::bump(&counters.failed);
                    queue.halt(format!("store failure: {err}"));
                    counters.set_fatal(err);
                }
            }
        }
    }

    async fn process(&self, run_id: Uuid, target: &PageTarget) -> PageOutcome {
        let url_id = match self.store.register_url(target).await {
            Ok(id) => id,
            Err(err) => {
                self.events
                    .record(None, ScrapeStep::Persist, false, &format!("{}: {err}", target.url))
                    .await;
                return store_failure(target, err);
            }
        };

        let page = match self.fetcher.fetch(run_id, &target.url).await {
            Ok(page) => {
                let message = format!("HTTP {} after {} attempt(s)", page.status, page.attempts);
                self.events.record(Some(url_id), ScrapeStep::Fetch, true, &message).await;
                page
            }
            Err(err) => {
                warn!(url = %target.url, attempts = err.attempts(), error = %err, "fetch failed");
                self.events
                    .record(Some(url_id), ScrapeStep::Fetch, false, &err.to_string())
                    .await;
                return PageOutcome::Failed(ScrapeStep::Fetch);
            }
        };

        let record = match self.extract(target, page.text()).await {
            Ok(record) => {
                self.events
                    .record(Some(url_id), ScrapeStep::Extract, true, record.kind())
                    .await;
                record
            }
            Err(message) => {
                warn!(url = %target.url, error = %message, "extraction failed");
                self.events
                    .record(Some(url_id), ScrapeStep::Extract, false, &message)
                    .await;
                return PageOutcome::Failed(ScrapeStep::Extract);
            }
        };

        // The transaction is rolled back before the failure event is written.
        match self.store.persist_page(url_id, target, &record, Utc::now()).await {
            Ok(outcome) => {
                info!(url = %target.url, kind = record.kind(), %outcome, "page stored");
                self.events
                    .record(Some(url_id), ScrapeStep::Persist, true, &outcome.to_string())
                    .await;
            }
            Err(err) => {
                self.events
                    .record(Some(url_id), ScrapeStep::Persist, false, &err.to_string())
                    .await;
                return store_failure(target, err);
            }
        }

        PageOutcome::Done {
            follow_ups: self.follow_ups(&record),
        }
    }

    /// Parsing is CPU-bound, so it runs off the async workers.
    async fn extract(&self, target: &PageTarget, body: String) -> Result<PageRecord, String> {
        let extractor = Arc::clone(&self.extractor);
        let target = target.clone();
        match tokio::task::spawn_blocking(move || extractor.extract(&target, &body)).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(err)) => Err(err.to_string()),
            Err(join) => Err(format!("extractor task failed: {join}")),
        }
    }

    fn follow_ups(&self, record: &PageRecord) -> Vec<PageTarget> {
        record
            .follow_up_targets()
            .into_iter()
            .filter(|t| t.class.is_fetchable())
            .filter(|t| self.options.follow_artists || t.class != PageClass::ArtistProfile)
            .collect()
    }
}

fn store_failure(target: &PageTarget, err: StoreError) -> PageOutcome {
    if err.is_fatal() {
        error!(url = %target.url, error = %err, "fatal store error");
        PageOutcome::Fatal(err)
    } else {
        warn!(url = %target.url, error = %err, "persist failed");
        PageOutcome::Failed(ScrapeStep::Persist)
    }
}
