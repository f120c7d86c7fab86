//! Natural key to surrogate id resolution.
//!
//! Every resolution is `INSERT .. ON CONFLICT DO NOTHING` followed by a lookup on the
//! unique key column, so concurrent workers racing on a first sighting converge on one
//! row without any in-process locking. Attribute columns are filled after resolution,
//! never the key.

use sqlx::SqliteConnection;

use revdb_core::{AlbumRecord, ArtistRef, AuthorRef, EntityKind, PageClass, PageTarget};

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: i64,
    pub created: bool,
}

struct KindTable {
    table: &'static str,
    id_column: &'static str,
    key_column: &'static str,
}

fn kind_table(kind: EntityKind) -> KindTable {
    let (table, id_column, key_column) = match kind {
        EntityKind::Url => ("urls", "url_id", "url"),
        EntityKind::Artist => ("artists", "artist_id", "artist_key"),
        EntityKind::Author => ("authors", "author_id", "author_key"),
        EntityKind::Album => ("albums", "album_id", "album_key"),
        EntityKind::Label => ("labels", "label_id", "label"),
        EntityKind::Genre => ("genres", "genre_id", "genre"),
        EntityKind::Keyword => ("keywords", "keyword_id", "keyword"),
        EntityKind::Entity => ("entities", "entity_id", "entity"),
        EntityKind::AuthorType => ("author_types", "author_type_id", "author_type"),
    };
    KindTable {
        table,
        id_column,
        key_column,
    }
}

/// Return the id for `(kind, key)`, inserting a row if none exists.
pub async fn resolve(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    key: &str,
) -> Result<Resolved, StoreError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::EmptyKey { kind });
    }
    let t = kind_table(kind);

    let inserted = sqlx::query(&format!(
        "INSERT INTO {} ({}) VALUES (?) ON CONFLICT({}) DO NOTHING",
        t.table, t.key_column, t.key_column
    ))
    .bind(key)
    .execute(&mut *conn)
    .await?;

    let id: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT {} FROM {} WHERE {} = ?",
        t.id_column, t.table, t.key_column
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    let created = inserted.rows_affected() == 1;
    match id {
        Some(id) if !created || id == inserted.last_insert_rowid() => Ok(Resolved { id, created }),
        _ => Err(StoreError::ResolutionConflict {
            kind,
            key: key.to_string(),
        }),
    }
}

/// Look up without inserting.
pub async fn find(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    key: &str,
) -> Result<Option<i64>, StoreError> {
    let t = kind_table(kind);
    let id = sqlx::query_scalar(&format!(
        "SELECT {} FROM {} WHERE {} = ?",
        t.id_column, t.table, t.key_column
    ))
    .bind(key.trim())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Resolve a URL and merge its classification flags and sitemap period into the row.
pub async fn resolve_url(
    conn: &mut SqliteConnection,
    target: &PageTarget,
) -> Result<Resolved, StoreError> {
    let resolved = resolve(conn, EntityKind::Url, &target.url).await?;
    touch_url(conn, resolved.id, target).await?;
    Ok(resolved)
}

/// Merge flags and period into an existing url row. Flags only ever switch on.
pub async fn touch_url(
    conn: &mut SqliteConnection,
    url_id: i64,
    target: &PageTarget,
) -> Result<(), StoreError> {
    let flags = target.flags;
    let period = target.period;
    sqlx::query(
        r#"
        UPDATE urls
           SET year       = COALESCE(year, ?),
               month      = COALESCE(month, ?),
               week       = COALESCE(week, ?),
               is_review  = MAX(is_review, ?),
               is_album   = MAX(is_album, ?),
               is_author  = MAX(is_author, ?),
               is_artist  = MAX(is_artist, ?),
               is_sitemap = MAX(is_sitemap, ?)
         WHERE url_id = ?
        "#,
    )
    .bind(period.year)
    .bind(period.month.map(i64::from))
    .bind(period.week.map(i64::from))
    .bind(flags.is_review)
    .bind(flags.is_album)
    .bind(flags.is_author)
    .bind(flags.is_artist)
    .bind(flags.is_sitemap)
    .bind(url_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Albums with no slug, title, publisher or year are skipped (`Ok(None)`).
pub async fn resolve_album(
    conn: &mut SqliteConnection,
    album: &AlbumRecord,
) -> Result<Option<Resolved>, StoreError> {
    let Some(key) = album.natural_key() else {
        return Ok(None);
    };
    let resolved = resolve(conn, EntityKind::Album, &key).await?;
    sqlx::query(
        r#"
        UPDATE albums
           SET album               = COALESCE(album, ?),
               publisher           = COALESCE(publisher, ?),
               release_year        = COALESCE(release_year, ?),
               score               = COALESCE(?, score),
               is_best_new_music   = MAX(is_best_new_music, ?),
               is_best_new_reissue = MAX(is_best_new_reissue, ?)
         WHERE album_id = ?
        "#,
    )
    .bind(album.title.as_deref())
    .bind(album.publisher.as_deref())
    .bind(album.release_year)
    .bind(album.score.map(i64::from))
    .bind(album.best_new_music)
    .bind(album.best_new_reissue)
    .bind(resolved.id)
    .execute(&mut *conn)
    .await?;
    Ok(Some(resolved))
}

pub async fn resolve_artist(
    conn: &mut SqliteConnection,
    artist: &ArtistRef,
) -> Result<Resolved, StoreError> {
    let url_id = match artist.profile_url.as_deref() {
        Some(url) => {
            let target = PageTarget::new(url, PageClass::ArtistProfile);
            Some(resolve_url(conn, &target).await?.id)
        }
        None => None,
    };
    let resolved = resolve(conn, EntityKind::Artist, &artist.natural_key()).await?;
    let name = Some(artist.name.trim()).filter(|n| !n.is_empty());
    fill_artist(conn, resolved.id, name, url_id).await?;
    Ok(resolved)
}

pub(crate) async fn fill_artist(
    conn: &mut SqliteConnection,
    artist_id: i64,
    name: Option<&str>,
    url_id: Option<i64>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE artists
           SET artist = COALESCE(artist, ?),
               url_id = COALESCE(url_id, ?)
         WHERE artist_id = ?
        "#,
    )
    .bind(name)
    .bind(url_id)
    .bind(artist_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Authors without any usable key are skipped (`Ok(None)`).
pub async fn resolve_author(
    conn: &mut SqliteConnection,
    author: &AuthorRef,
) -> Result<Option<Resolved>, StoreError> {
    let Some(key) = author.natural_key().filter(|k| !k.trim().is_empty()) else {
        return Ok(None);
    };
    let url_id = match author.profile_url.as_deref() {
        Some(url) => {
            let target = PageTarget::new(url, PageClass::AuthorProfile);
            Some(resolve_url(conn, &target).await?.id)
        }
        None => None,
    };
    let resolved = resolve(conn, EntityKind::Author, &key).await?;
    fill_author(conn, resolved.id, author.name.as_deref(), author.site_id.as_deref(), url_id).await?;
    Ok(Some(resolved))
}

pub(crate) async fn fill_author(
    conn: &mut SqliteConnection,
    author_id: i64,
    name: Option<&str>,
    site_id: Option<&str>,
    url_id: Option<i64>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE authors
           SET author         = COALESCE(author, ?),
               site_author_id = COALESCE(site_author_id, ?),
               url_id         = COALESCE(url_id, ?)
         WHERE author_id = ?
        "#,
    )
    .bind(name)
    .bind(site_id)
    .bind(url_id)
    .bind(author_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
