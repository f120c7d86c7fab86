//! Per-URL write sets. Each record is persisted inside one transaction so a crash
//! leaves either all of a page's rows or none of them.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use revdb_core::{
    timestamp_text, ArtistRecord, AuthorBioRecord, EntityKind, PageRecord, PageTarget,
    ReviewRecord, UrlDiscovery,
};

use crate::links::{link, Link, LinkOutcome};
use crate::resolver::{
    fill_artist, fill_author, find, resolve, resolve_album, resolve_artist, resolve_author,
    resolve_url, touch_url, Resolved,
};
use crate::roles::{current_roles, record_roles, RoleChange, RoleVersion};
use crate::{Store, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub review_id: Option<i64>,
    pub author_id: Option<i64>,
    pub artist_id: Option<i64>,
    pub entities_created: usize,
    pub links_inserted: usize,
    pub links_updated: usize,
    pub urls_recorded: usize,
    pub role_change: Option<RoleChange>,
}

impl PersistOutcome {
    fn count(&mut self, resolved: Resolved) -> i64 {
        self.entities_created += usize::from(resolved.created);
        resolved.id
    }

    fn count_link(&mut self, outcome: LinkOutcome) {
        match outcome {
            LinkOutcome::Inserted => self.links_inserted += 1,
            LinkOutcome::ScoreUpdated => self.links_updated += 1,
            LinkOutcome::Unchanged => {}
        }
    }
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new entities, {} new links, {} rescored",
            self.entities_created, self.links_inserted, self.links_updated
        )?;
        if self.urls_recorded > 0 {
            write!(f, ", {} urls", self.urls_recorded)?;
        }
        if let Some(change) = self.role_change {
            write!(f, ", roles {change:?}")?;
        }
        Ok(())
    }
}

impl Store {
    /// Persist one extracted page as a single transaction.
    pub async fn persist_page(
        &self,
        url_id: i64,
        target: &PageTarget,
        record: &PageRecord,
        observed_at: DateTime<Utc>,
    ) -> Result<PersistOutcome, StoreError> {
        let mut tx = self.begin().await?;
        let outcome = persist_record(&mut tx, url_id, target, record, observed_at).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Record a URL (autocommit) and return its id, so step events can reference it.
    pub async fn register_url(&self, target: &PageTarget) -> Result<i64, StoreError> {
        let mut conn = self.pool().acquire().await.map_err(StoreError::Unavailable)?;
        Ok(resolve_url(&mut conn, target).await?.id)
    }

    /// Current role pair for the author whose profile lives at `profile_url`.
    pub async fn author_roles(&self, profile_url: &str) -> Result<Option<RoleVersion>, StoreError> {
        let mut conn = self.pool().acquire().await.map_err(StoreError::Unavailable)?;
        match find(&mut conn, EntityKind::Author, profile_url).await? {
            Some(author_id) => current_roles(&mut conn, author_id).await,
            None => Ok(None),
        }
    }
}

/// Write the full set of rows for `record`. The first statement is a write on the
/// page's own url row so the SQLite write lock is taken up front.
pub async fn persist_record(
    conn: &mut SqliteConnection,
    url_id: i64,
    target: &PageTarget,
    record: &PageRecord,
    observed_at: DateTime<Utc>,
) -> Result<PersistOutcome, StoreError> {
    touch_url(conn, url_id, target).await?;

    let outcome = match record {
        PageRecord::Discovery(discovery) => persist_discovery(conn, discovery).await?,
        PageRecord::Review(review) => persist_review(conn, url_id, review).await?,
        PageRecord::Artist(artist) => persist_artist(conn, url_id, target, artist).await?,
        PageRecord::AuthorBio(bio) => persist_author_bio(conn, url_id, target, bio, observed_at).await?,
    };
    debug!(url = %target.url, kind = record.kind(), %outcome, "persisted");
    Ok(outcome)
}

async fn persist_discovery(
    conn: &mut SqliteConnection,
    discovery: &UrlDiscovery,
) -> Result<PersistOutcome, StoreError> {
    let mut outcome = PersistOutcome::default();
    for target in &discovery.links {
        let resolved = resolve_url(conn, target).await?;
        outcome.count(resolved);
        outcome.urls_recorded += 1;
    }
    Ok(outcome)
}

pub(crate) async fn write_review_row(
    conn: &mut SqliteConnection,
    url_id: i64,
    review: &ReviewRecord,
) -> Result<i64, StoreError> {
    let review_id = sqlx::query_scalar(
        r#"
        INSERT INTO reviews (url_id, content_id, revisions, body, description, date_pub, date_mod)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url_id) DO UPDATE
           SET content_id  = COALESCE(excluded.content_id, content_id),
               revisions   = COALESCE(excluded.revisions, revisions),
               body        = COALESCE(excluded.body, body),
               description = COALESCE(excluded.description, description),
               date_pub    = COALESCE(excluded.date_pub, date_pub),
               date_mod    = COALESCE(excluded.date_mod, date_mod)
        RETURNING review_id
        "#,
    )
    .bind(url_id)
    .bind(review.content_id.as_deref())
    .bind(review.revisions)
    .bind(review.body.as_deref())
    .bind(review.description.as_deref())
    .bind(review.date_pub.map(timestamp_text))
    .bind(review.date_mod.map(timestamp_text))
    .fetch_one(&mut *conn)
    .await?;
    Ok(review_id)
}

pub(crate) async fn write_review_albums(
    conn: &mut SqliteConnection,
    review_id: i64,
    review: &ReviewRecord,
    outcome: &mut PersistOutcome,
) -> Result<(), StoreError> {
    for album in &review.albums {
        if let Some(resolved) = resolve_album(conn, album).await? {
            let album_id = outcome.count(resolved);
            outcome.count_link(link(conn, review_id, Link::Album(album_id)).await?);
        }
    }
    Ok(())
}

pub(crate) async fn write_review_authors(
    conn: &mut SqliteConnection,
    review_id: i64,
    review: &ReviewRecord,
    outcome: &mut PersistOutcome,
) -> Result<(), StoreError> {
    for author in &review.authors {
        if let Some(resolved) = resolve_author(conn, author).await? {
            let author_id = outcome.count(resolved);
            outcome.count_link(link(conn, review_id, Link::Author(author_id)).await?);
        }
    }
    Ok(())
}

async fn write_review_artists(
    conn: &mut SqliteConnection,
    review_id: i64,
    review: &ReviewRecord,
    outcome: &mut PersistOutcome,
) -> Result<(), StoreError> {
    for artist in review.artists.iter().filter(|a| !a.natural_key().trim().is_empty()) {
        let artist_id = outcome.count(resolve_artist(conn, artist).await?);
        outcome.count_link(link(conn, review_id, Link::Artist(artist_id)).await?);
        for genre in non_empty(&artist.genres) {
            let genre_id = outcome.count(resolve(conn, EntityKind::Genre, genre).await?);
            let genre_link = Link::ArtistGenre {
                artist_id,
                genre_id,
            };
            outcome.count_link(link(conn, review_id, genre_link).await?);
        }
    }
    Ok(())
}

async fn write_review_vocab(
    conn: &mut SqliteConnection,
    review_id: i64,
    review: &ReviewRecord,
    outcome: &mut PersistOutcome,
) -> Result<(), StoreError> {
    for label in non_empty(&review.labels) {
        let label_id = outcome.count(resolve(conn, EntityKind::Label, label).await?);
        outcome.count_link(link(conn, review_id, Link::Label(label_id)).await?);
    }
    for kw in review.keywords.iter().filter(|k| !k.term.trim().is_empty()) {
        let keyword_id = outcome.count(resolve(conn, EntityKind::Keyword, &kw.term).await?);
        let scored = Link::Keyword {
            keyword_id,
            score: kw.score,
        };
        outcome.count_link(link(conn, review_id, scored).await?);
    }
    for ent in review.entities.iter().filter(|e| !e.term.trim().is_empty()) {
        let entity_id = outcome.count(resolve(conn, EntityKind::Entity, &ent.term).await?);
        let scored = Link::Entity {
            entity_id,
            score: ent.score,
        };
        outcome.count_link(link(conn, review_id, scored).await?);
    }
    Ok(())
}

async fn persist_review(
    conn: &mut SqliteConnection,
    url_id: i64,
    review: &ReviewRecord,
) -> Result<PersistOutcome, StoreError> {
    let review_id = write_review_row(conn, url_id, review).await?;
    let mut outcome = PersistOutcome {
        review_id: Some(review_id),
        ..Default::default()
    };
    write_review_albums(conn, review_id, review, &mut outcome).await?;
    write_review_authors(conn, review_id, review, &mut outcome).await?;
    write_review_artists(conn, review_id, review, &mut outcome).await?;
    write_review_vocab(conn, review_id, review, &mut outcome).await?;
    Ok(outcome)
}

async fn persist_artist(
    conn: &mut SqliteConnection,
    url_id: i64,
    target: &PageTarget,
    artist: &ArtistRecord,
) -> Result<PersistOutcome, StoreError> {
    let mut outcome = PersistOutcome::default();
    let artist_id = outcome.count(resolve(conn, EntityKind::Artist, &target.url).await?);
    fill_artist(conn, artist_id, artist.name.as_deref(), Some(url_id)).await?;
    // Profile genres have no review to hang off; the vocabulary row is still recorded.
    for genre in non_empty(&artist.genres) {
        outcome.count(resolve(conn, EntityKind::Genre, genre).await?);
    }
    outcome.artist_id = Some(artist_id);
    Ok(outcome)
}

async fn persist_author_bio(
    conn: &mut SqliteConnection,
    url_id: i64,
    target: &PageTarget,
    bio: &AuthorBioRecord,
    observed_at: DateTime<Utc>,
) -> Result<PersistOutcome, StoreError> {
    let mut outcome = PersistOutcome::default();
    let author_id = outcome.count(resolve(conn, EntityKind::Author, &target.url).await?);
    fill_author(conn, author_id, bio.name.as_deref(), None, Some(url_id)).await?;

    sqlx::query(
        r#"
        INSERT INTO author_bios (author_id, date_pub, revisions, bio)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(author_id) DO UPDATE
           SET date_pub  = excluded.date_pub,
               revisions = excluded.revisions,
               bio       = excluded.bio
        "#,
    )
    .bind(author_id)
    .bind(bio.date_pub.map(timestamp_text))
    .bind(bio.revisions)
    .bind(bio.bio.as_deref())
    .execute(&mut *conn)
    .await?;

    outcome.role_change = Some(record_roles(conn, author_id, &bio.roles, observed_at).await?);
    outcome.author_id = Some(author_id);
    Ok(outcome)
}

fn non_empty(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use chrono::TimeZone;
    use revdb_core::{AlbumRecord, ArtistRef, AuthorRef, PageClass, RolePair, ScoredTerm};

    const REVIEW_URL: &str = "https://pitchfork.com/reviews/albums/x-kid-a/";

    fn review() -> ReviewRecord {
        ReviewRecord {
            content_id: Some("5929a1f9".into()),
            body: Some("It rules.".into()),
            albums: vec![AlbumRecord {
                slug: Some("kid-a".into()),
                title: Some("Kid A".into()),
                score: Some(100),
                ..Default::default()
            }],
            authors: vec![AuthorRef {
                site_id: Some("a1".into()),
                name: Some("Jane Doe".into()),
                profile_url: Some("https://pitchfork.com/staff/jane-doe/".into()),
            }],
            artists: vec![ArtistRef {
                name: "Radiohead".into(),
                profile_url: Some("https://pitchfork.com/artists/3490-radiohead/".into()),
                genres: vec!["Rock".into(), "Electronic".into()],
            }],
            labels: vec!["Parlophone".into(), "Capitol".into()],
            keywords: vec![ScoredTerm {
                term: "glitch".into(),
                score: Some(0.4),
            }],
            entities: vec![],
            ..Default::default()
        }
    }

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("ts")
    }

    async fn page_url(store: &Store, target: &PageTarget) -> i64 {
        let mut conn = store.pool().acquire().await.expect("conn");
        resolve_url(&mut conn, target).await.expect("url").id
    }

    #[tokio::test]
    async fn review_write_set_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let target = PageTarget::new(REVIEW_URL, PageClass::Review);
        let url_id = page_url(&store, &target).await;
        let record = PageRecord::Review(review());

        let first = store.persist_page(url_id, &target, &record, observed()).await.expect("first");
        assert!(first.entities_created >= 7);
        assert_eq!(first.links_inserted, 8);

        let before = store.table_counts().await.expect("counts");
        let second = store.persist_page(url_id, &target, &record, observed()).await.expect("second");
        assert_eq!(second.entities_created, 0);
        assert_eq!(second.links_inserted, 0);
        assert_eq!(second.review_id, first.review_id);
        assert_eq!(store.table_counts().await.expect("counts"), before);
    }

    #[tokio::test]
    async fn keyless_albums_on_different_reviews_stay_apart() {
        let (_dir, store) = temp_store().await;
        for (slug, score) in [("first", 50u8), ("second", 90u8)] {
            let url = format!("https://pitchfork.com/reviews/albums/{slug}/");
            let target = PageTarget::new(url, PageClass::Review);
            let url_id = page_url(&store, &target).await;
            let record = ReviewRecord {
                body: Some("Untitled.".into()),
                albums: vec![AlbumRecord {
                    score: Some(score),
                    ..Default::default()
                }],
                ..Default::default()
            };
            let outcome = store
                .persist_page(url_id, &target, &PageRecord::Review(record), observed())
                .await
                .expect("persist");
            assert!(outcome.review_id.is_some());
        }
        assert_eq!(store.count_rows("reviews").await.expect("count"), 2);
        assert_eq!(store.count_rows("albums").await.expect("count"), 0);
        assert_eq!(store.count_rows("review_albums").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_partial_review() {
        let (_dir, store) = temp_store().await;
        let target = PageTarget::new(REVIEW_URL, PageClass::Review);
        let url_id = page_url(&store, &target).await;
        let record = review();

        {
            let mut tx = store.begin().await.expect("begin");
            touch_url(&mut tx, url_id, &target).await.expect("touch");
            let review_id = write_review_row(&mut tx, url_id, &record).await.expect("row");
            let mut outcome = PersistOutcome::default();
            write_review_albums(&mut tx, review_id, &record, &mut outcome).await.expect("albums");
            // Crash before author links: the transaction is dropped without commit.
        }
        assert_eq!(store.count_rows("reviews").await.expect("count"), 0);
        assert_eq!(store.count_rows("review_albums").await.expect("count"), 0);
        assert_eq!(store.count_rows("albums").await.expect("count"), 0);

        store
            .persist_page(url_id, &target, &PageRecord::Review(record), observed())
            .await
            .expect("rerun");
        assert_eq!(store.count_rows("review_albums").await.expect("count"), 1);
        assert_eq!(store.count_rows("review_authors").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn author_page_after_review_shares_author_row() {
        let (_dir, store) = temp_store().await;
        let review_target = PageTarget::new(REVIEW_URL, PageClass::Review);
        let review_url_id = page_url(&store, &review_target).await;
        store
            .persist_page(review_url_id, &review_target, &PageRecord::Review(review()), observed())
            .await
            .expect("review");

        let author_target = PageTarget::new("https://pitchfork.com/staff/jane-doe/", PageClass::AuthorProfile);
        let author_url_id = page_url(&store, &author_target).await;
        let bio = PageRecord::AuthorBio(AuthorBioRecord {
            name: Some("Jane Doe".into()),
            bio: Some("Writes about records.".into()),
            roles: RolePair::new(Some("Contributor"), None),
            ..Default::default()
        });
        let outcome = store
            .persist_page(author_url_id, &author_target, &bio, observed())
            .await
            .expect("bio");
        assert_eq!(outcome.entities_created, 0);
        assert_eq!(outcome.role_change, Some(RoleChange::Appended));
        assert_eq!(store.count_rows("authors").await.expect("count"), 1);
        assert_eq!(store.count_rows("author_bios").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn discovery_records_urls_with_flags() {
        let (_dir, store) = temp_store().await;
        let sitemap = PageTarget::new("https://pitchfork.com/sitemap.xml?year=2020", PageClass::Sitemap);
        let url_id = page_url(&store, &sitemap).await;
        let record = PageRecord::Discovery(UrlDiscovery {
            links: vec![
                PageTarget::new(REVIEW_URL, PageClass::Review),
                PageTarget::new("https://pitchfork.com/news/x/", PageClass::Other),
            ],
        });

        let outcome = store.persist_page(url_id, &sitemap, &record, observed()).await.expect("persist");
        assert_eq!(outcome.urls_recorded, 2);
        assert_eq!(store.count_rows("urls").await.expect("count"), 3);
    }
}
