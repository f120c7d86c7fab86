//! Append-only author role history.
//!
//! An author's current role pair is the row with the greatest `as_of`. A new row is
//! appended only when an observation differs from that row. Two observations at the
//! same instant resolve last-writer-wins; observations older than the current row
//! are stale and ignored.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use revdb_core::{timestamp_text, EntityKind, RolePair};

use crate::resolver::resolve;
use crate::{parse_timestamp, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleVersion {
    pub author_id: i64,
    pub roles: RolePair,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Appended,
    Unchanged,
    /// Same instant as the current row; the newer write replaced it.
    Replaced,
    Stale,
}

async fn role_type_id(
    conn: &mut SqliteConnection,
    title: Option<&str>,
) -> Result<Option<i64>, StoreError> {
    match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => Ok(Some(resolve(conn, EntityKind::AuthorType, title).await?.id)),
        None => Ok(None),
    }
}

pub async fn record_roles(
    conn: &mut SqliteConnection,
    author_id: i64,
    roles: &RolePair,
    observed_at: DateTime<Utc>,
) -> Result<RoleChange, StoreError> {
    let role1 = role_type_id(conn, roles.primary.as_deref()).await?;
    let role2 = role_type_id(conn, roles.secondary.as_deref()).await?;
    let as_of = timestamp_text(observed_at);

    let latest = sqlx::query(
        r#"
        SELECT role1_id, role2_id, as_of
          FROM author_role_versions
         WHERE author_id = ?
         ORDER BY as_of DESC
         LIMIT 1
        "#,
    )
    .bind(author_id)
    .fetch_optional(&mut *conn)
    .await?;

    let change = match latest {
        None => RoleChange::Appended,
        Some(row) => {
            let cur1: Option<i64> = row.try_get("role1_id")?;
            let cur2: Option<i64> = row.try_get("role2_id")?;
            let cur_as_of: String = row.try_get("as_of")?;
            if (cur1, cur2) == (role1, role2) {
                RoleChange::Unchanged
            } else if as_of < cur_as_of {
                RoleChange::Stale
            } else if as_of == cur_as_of {
                RoleChange::Replaced
            } else {
                RoleChange::Appended
            }
        }
    };

    if matches!(change, RoleChange::Appended | RoleChange::Replaced) {
        sqlx::query(
            r#"
            INSERT INTO author_role_versions (author_id, role1_id, role2_id, as_of)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(author_id, as_of) DO UPDATE
               SET role1_id = excluded.role1_id,
                   role2_id = excluded.role2_id
            "#,
        )
        .bind(author_id)
        .bind(role1)
        .bind(role2)
        .bind(&as_of)
        .execute(&mut *conn)
        .await?;
    }
    Ok(change)
}

const VERSION_SELECT: &str = r#"
    SELECT v.author_id, t1.author_type AS role1, t2.author_type AS role2, v.as_of
      FROM author_role_versions v
      LEFT JOIN author_types t1 ON t1.author_type_id = v.role1_id
      LEFT JOIN author_types t2 ON t2.author_type_id = v.role2_id
     WHERE v.author_id = ?
"#;

fn version_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RoleVersion, StoreError> {
    let role1: Option<String> = row.try_get("role1")?;
    let role2: Option<String> = row.try_get("role2")?;
    let as_of: String = row.try_get("as_of")?;
    Ok(RoleVersion {
        author_id: row.try_get("author_id")?,
        roles: RolePair::new(role1.as_deref(), role2.as_deref()),
        as_of: parse_timestamp(&as_of)?,
    })
}

pub async fn current_roles(
    conn: &mut SqliteConnection,
    author_id: i64,
) -> Result<Option<RoleVersion>, StoreError> {
    let row = sqlx::query(&format!("{VERSION_SELECT} ORDER BY v.as_of DESC LIMIT 1"))
        .bind(author_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(version_from_row).transpose()
}

/// Full history, oldest first.
pub async fn role_history(
    conn: &mut SqliteConnection,
    author_id: i64,
) -> Result<Vec<RoleVersion>, StoreError> {
    let rows = sqlx::query(&format!("{VERSION_SELECT} ORDER BY v.as_of ASC"))
        .bind(author_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(version_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, hour, 0, 0).single().expect("ts")
    }

    async fn author(conn: &mut SqliteConnection) -> i64 {
        resolve(conn, EntityKind::Author, "https://pitchfork.com/staff/jane-doe/")
            .await
            .expect("author")
            .id
    }

    #[tokio::test]
    async fn role_change_appends_and_keeps_history() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let author_id = author(&mut conn).await;

        let before = RolePair::new(Some("Contributor"), None);
        let after = RolePair::new(Some("Senior Editor"), Some("Contributor"));
        assert_eq!(
            record_roles(&mut conn, author_id, &before, at(1)).await.expect("t1"),
            RoleChange::Appended
        );
        assert_eq!(
            record_roles(&mut conn, author_id, &before, at(2)).await.expect("t2"),
            RoleChange::Unchanged
        );
        assert_eq!(
            record_roles(&mut conn, author_id, &after, at(3)).await.expect("t3"),
            RoleChange::Appended
        );

        let current = current_roles(&mut conn, author_id).await.expect("current").expect("some");
        assert_eq!(current.roles, after);
        assert_eq!(current.as_of, at(3));

        let history = role_history(&mut conn, author_id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].roles, before);
        assert_eq!(history[0].as_of, at(1));
    }

    #[tokio::test]
    async fn repeated_observation_adds_nothing() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let author_id = author(&mut conn).await;
        let roles = RolePair::new(Some("Contributor"), None);

        for hour in 1..4 {
            record_roles(&mut conn, author_id, &roles, at(hour)).await.expect("record");
        }
        assert_eq!(store.count_rows("author_role_versions").await.expect("count"), 1);
        assert_eq!(store.count_rows("author_types").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn same_instant_is_last_writer_wins_and_older_is_stale() {
        let (_dir, store) = temp_store().await;
        let mut conn = store.pool().acquire().await.expect("conn");
        let author_id = author(&mut conn).await;

        let first = RolePair::new(Some("Contributor"), None);
        let second = RolePair::new(Some("Editor"), None);
        record_roles(&mut conn, author_id, &first, at(5)).await.expect("first");
        assert_eq!(
            record_roles(&mut conn, author_id, &second, at(5)).await.expect("tie"),
            RoleChange::Replaced
        );
        assert_eq!(
            record_roles(&mut conn, author_id, &first, at(4)).await.expect("old"),
            RoleChange::Stale
        );

        let history = role_history(&mut conn, author_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].roles, second);
    }
}
