//! Persistent tag records.

use crate::error::Result;
use crate::models::{normalize_groups, TagRecord};
use sqlx::SqlitePool;
use storage::models::TagRow;
use tracing::debug;

/// Keyed store of tag records; `tag_id` is the primary key.
#[async_trait::async_trait]
pub trait TagStore: Send + Sync {
    async fn get(&self, tag_id: &str) -> Result<Option<TagRecord>>;
    /// Inserts or replaces the record with the same `tag_id`.
    async fn upsert(&self, record: &TagRecord) -> Result<()>;
    /// Returns whether a record was removed.
    async fn delete(&self, tag_id: &str) -> Result<bool>;
    /// All records, newest first.
    async fn list_all(&self) -> Result<Vec<TagRecord>>;
}

pub struct SqliteTagStore {
    pool: SqlitePool,
}

impl SqliteTagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait::async_trait]
impl TagStore for SqliteTagStore {
    async fn get(&self, tag_id: &str) -> Result<Option<TagRecord>> {
        let row = sqlx::query_as::<_, TagRow>("SELECT * FROM tags WHERE tag_id = ?1")
            .bind(tag_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TagRecord::try_from).transpose()
    }

    async fn upsert(&self, record: &TagRecord) -> Result<()> {
        let row = record.to_row();
        sqlx::query(
            r#"
            INSERT INTO tags
                (tag_id, kind, content, title, description, groups_json, locale, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(tag_id) DO UPDATE SET
                kind=excluded.kind,
                content=excluded.content,
                title=excluded.title,
                description=excluded.description,
                groups_json=excluded.groups_json,
                locale=excluded.locale,
                created_at=excluded.created_at
            "#,
        )
        .bind(&row.tag_id)
        .bind(&row.kind)
        .bind(&row.content)
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.groups_json)
        .bind(&row.locale)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        debug!(tag_id = %row.tag_id, kind = %row.kind, "tag saved");
        Ok(())
    }

    async fn delete(&self, tag_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tags WHERE tag_id = ?1")
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<TagRecord>> {
        let rows = sqlx::query_as::<_, TagRow>("SELECT * FROM tags ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TagRecord::try_from).collect()
    }
}

/// Changes title, description and groups, leaving content and timestamp alone.
pub async fn update_metadata(
    store: &dyn TagStore,
    tag_id: &str,
    title: &str,
    description: Option<&str>,
    groups: &[String],
) -> Result<Option<TagRecord>> {
    let Some(mut record) = store.get(tag_id).await? else {
        return Ok(None);
    };
    record.title = title.trim().to_string();
    record.description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    record.groups = normalize_groups(groups.iter().cloned());
    store.upsert(&record).await?;
    Ok(Some(record))
}

pub async fn list_in_group(store: &dyn TagStore, group: Option<&str>) -> Result<Vec<TagRecord>> {
    let records = store.list_all().await?;
    Ok(match group {
        None => records,
        Some(g) => records
            .into_iter()
            .filter(|r| r.groups.iter().any(|x| x == g))
            .collect(),
    })
}

/// Every group name in use, sorted.
pub async fn distinct_groups(store: &dyn TagStore) -> Result<Vec<String>> {
    let mut groups: Vec<String> = store
        .list_all()
        .await?
        .into_iter()
        .flat_map(|r| r.groups)
        .collect();
    groups.sort();
    groups.dedup();
    Ok(groups)
}
