//! Scraping event ledger. One row per step attempt, never updated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::error;

use revdb_core::{timestamp_text, PageTarget, ScrapeStep, SitemapPeriod, UrlFlags};

use crate::{parse_timestamp, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapingEvent {
    pub event_id: i64,
    pub timestamp: DateTime<Utc>,
    pub url_id: Option<i64>,
    pub process: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStats {
    pub process: String,
    pub succeeded: i64,
    pub failed: i64,
}

/// Writes events on its own autocommit connections, outside any per-URL transaction.
#[derive(Debug, Clone)]
pub struct EventLog {
    pool: SqlitePool,
}

impl EventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one step outcome. A failed write is logged and swallowed so the
    /// caller's own outcome is never masked by the ledger.
    pub async fn record(&self, url_id: Option<i64>, step: ScrapeStep, success: bool, message: &str) {
        if let Err(err) = self.try_record(url_id, step, success, message).await {
            error!(?url_id, %step, success, error = %err, "failed to write scraping event");
        }
    }

    pub async fn try_record(
        &self,
        url_id: Option<i64>,
        step: ScrapeStep,
        success: bool,
        message: &str,
    ) -> Result<i64, StoreError> {
        let event_id = sqlx::query_scalar(
            r#"
            INSERT INTO scraping_events (timestamp, url_id, process, success, message)
            VALUES (?, ?, ?, ?, ?)
            RETURNING event_id
            "#,
        )
        .bind(timestamp_text(Utc::now()))
        .bind(url_id)
        .bind(step.as_str())
        .bind(success)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(event_id)
    }

    pub async fn events_for_url(&self, url: &str) -> Result<Vec<ScrapingEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.event_id, e.timestamp, e.url_id, e.process, e.success, e.message
              FROM scraping_events e
              JOIN urls u ON u.url_id = e.url_id
             WHERE u.url = ?
             ORDER BY e.event_id
            "#,
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: String = row.try_get("timestamp")?;
            out.push(ScrapingEvent {
                event_id: row.try_get("event_id")?,
                timestamp: parse_timestamp(&timestamp)?,
                url_id: row.try_get("url_id")?,
                process: row.try_get("process")?,
                success: row.try_get("success")?,
                message: row.try_get("message")?,
            });
        }
        Ok(out)
    }

    /// URLs whose most recent event is a failure, rebuilt as work items.
    pub async fn failed_targets(&self) -> Result<Vec<PageTarget>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.url, u.year, u.month, u.week,
                   u.is_review, u.is_album, u.is_author, u.is_artist, u.is_sitemap
              FROM urls u
              JOIN scraping_events e ON e.url_id = u.url_id
             WHERE e.event_id = (SELECT MAX(event_id) FROM scraping_events x WHERE x.url_id = u.url_id)
               AND e.success = 0
             ORDER BY u.url_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let flags = UrlFlags {
                is_review: row.try_get("is_review")?,
                is_album: row.try_get("is_album")?,
                is_author: row.try_get("is_author")?,
                is_artist: row.try_get("is_artist")?,
                is_sitemap: row.try_get("is_sitemap")?,
            };
            let month: Option<i64> = row.try_get("month")?;
            let week: Option<i64> = row.try_get("week")?;
            out.push(PageTarget {
                url: row.try_get("url")?,
                class: flags.class(),
                flags,
                period: SitemapPeriod {
                    year: row.try_get("year")?,
                    month: month.and_then(|m| u32::try_from(m).ok()),
                    week: week.and_then(|w| u32::try_from(w).ok()),
                },
            });
        }
        Ok(out)
    }

    pub async fn step_stats(&self) -> Result<Vec<StepStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT process,
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS succeeded,
                   SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) AS failed
              FROM scraping_events
             GROUP BY process
             ORDER BY process
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StepStats {
                    process: row.try_get("process")?,
                    succeeded: row.try_get("succeeded")?,
                    failed: row.try_get("failed")?,
                })
            })
            .collect()
    }
}
