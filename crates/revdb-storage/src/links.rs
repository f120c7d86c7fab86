//! Review-to-entity relationship rows.

use sqlx::SqliteConnection;

use crate::StoreError;

/// One relationship from a review to a resolved entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Link {
    Album(i64),
    Author(i64),
    Artist(i64),
    Label(i64),
    Keyword { keyword_id: i64, score: Option<f64> },
    Entity { entity_id: i64, score: Option<f64> },
    ArtistGenre { artist_id: i64, genre_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Inserted,
    /// Relationship already present with the same attributes.
    Unchanged,
    /// Relationship present; the latest extraction's score replaced the old one.
    ScoreUpdated,
}

/// Write one relationship. Existing links are left alone, except scored links
/// whose score is replaced by the latest value.
pub async fn link(
    conn: &mut SqliteConnection,
    review_id: i64,
    link: Link,
) -> Result<LinkOutcome, StoreError> {
    match link {
        Link::Album(id) => plain(conn, "review_albums", "album_id", review_id, id).await,
        Link::Author(id) => plain(conn, "review_authors", "author_id", review_id, id).await,
        Link::Artist(id) => plain(conn, "review_artists", "artist_id", review_id, id).await,
        Link::Label(id) => plain(conn, "review_labels", "label_id", review_id, id).await,
        Link::Keyword { keyword_id, score } => {
            scored(conn, "review_keywords", "keyword_id", review_id, keyword_id, score).await
        }
        Link::Entity { entity_id, score } => {
            scored(conn, "review_entities", "entity_id", review_id, entity_id, score).await
        }
        Link::ArtistGenre {
            artist_id,
            genre_id,
        } => {
            let done = sqlx::query(
                r#"
                INSERT INTO review_artist_genres (review_id, artist_id, genre_id)
                VALUES (?, ?, ?)
                ON CONFLICT(review_id, artist_id, genre_id) DO NOTHING
                "#,
            )
            .bind(review_id)
            .bind(artist_id)
            .bind(genre_id)
            .execute(&mut *conn)
            .await?;
            Ok(outcome(done.rows_affected()))
        }
    }
}

fn outcome(rows_affected: u64) -> LinkOutcome {
    if rows_affected == 1 {
        LinkOutcome::Inserted
    } else {
        LinkOutcome::Unchanged
    }
}

async fn plain(
    conn: &mut SqliteConnection,
    table: &'static str,
    column: &'static str,
    review_id: i64,
    other_id: i64,
) -> Result<LinkOutcome, StoreError> {
    let done = sqlx::query(&format!(
        "INSERT INTO {table} (review_id, {column}) VALUES (?, ?) ON CONFLICT(review_id, {column}) DO NOTHING"
    ))
    .bind(review_id)
    .bind(other_id)
    .execute(&mut *conn)
    .await?;
    Ok(outcome(done.rows_affected()))
}

async fn scored(
    conn: &mut SqliteConnection,
    table: &'static str,
    column: &'static str,
    review_id: i64,
    other_id: i64,
    score: Option<f64>,
) -> Result<LinkOutcome, StoreError> {
    let existing: Option<Option<f64>> = sqlx::query_scalar(&format!(
        "SELECT score FROM {table} WHERE review_id = ? AND {column} = ?"
    ))
    .bind(review_id)
    .bind(other_id)
    .fetch_optional(&mut *conn)
    .await?;

    let result = match existing {
        Some(current) if current == score => LinkOutcome::Unchanged,
        Some(_) => LinkOutcome::ScoreUpdated,
        None => LinkOutcome::Inserted,
    };
    if result == LinkOutcome::Unchanged {
        return Ok(result);
    }

    sqlx::query(&format!(
        "INSERT INTO {table} (review_id, {column}, score) VALUES (?, ?, ?) \
         ON CONFLICT(review_id, {column}) DO UPDATE SET score = excluded.score"
    ))
    .bind(review_id)
    .bind(other_id)
    .bind(score)
    .execute(&mut *conn)
    .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use crate::store::test_support::temp_store;
    use revdb_core::EntityKind;

    async fn seed_review(conn: &mut SqliteConnection) -> i64 {
        let url = resolve(conn, EntityKind::Url, "https://pitchfork.com/reviews/albums/a/")
            .await
            .expect("url");
        sqlx::query_scalar("INSERT INTO reviews (url_id) VALUES (?) RETURNING review_id")
            .bind(url.id)
            .fetch_one(&mut *conn)
            .await
            .expect("review")
    }

    #[tokio::test]
    async fn links_are_idempotent() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let review_id = seed_review(&mut conn).await;
        let label = resolve(&mut conn, EntityKind::Label, "4AD").await.expect("label");

        assert_eq!(
            link(&mut conn, review_id, Link::Label(label.id)).await.expect("first"),
            LinkOutcome::Inserted
        );
        assert_eq!(
            link(&mut conn, review_id, Link::Label(label.id)).await.expect("second"),
            LinkOutcome::Unchanged
        );
        assert_eq!(store.count_rows("review_labels").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn keyword_score_follows_latest_extraction() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let review_id = seed_review(&mut conn).await;
        let kw = resolve(&mut conn, EntityKind::Keyword, "shoegaze").await.expect("kw");

        let first = Link::Keyword {
            keyword_id: kw.id,
            score: Some(0.5),
        };
        let rescored = Link::Keyword {
            keyword_id: kw.id,
            score: Some(0.8),
        };
        assert_eq!(link(&mut conn, review_id, first).await.expect("insert"), LinkOutcome::Inserted);
        assert_eq!(link(&mut conn, review_id, first).await.expect("same"), LinkOutcome::Unchanged);
        assert_eq!(
            link(&mut conn, review_id, rescored).await.expect("update"),
            LinkOutcome::ScoreUpdated
        );

        let score: Option<f64> =
            sqlx::query_scalar("SELECT score FROM review_keywords WHERE review_id = ?")
                .bind(review_id)
                .fetch_one(&mut *conn)
                .await
                .expect("score");
        assert_eq!(score, Some(0.8));
        assert_eq!(store.count_rows("review_keywords").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn link_to_missing_entity_is_rejected() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let review_id = seed_review(&mut conn).await;
        assert!(link(&mut conn, review_id, Link::Album(9_999)).await.is_err());
    }
}
