//! SQLite-backed ledger

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::ledger::Ledger;
use crate::types::{normalize_name, summarize, PublicationRecord, SourceItem};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the ledger database at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory ledger
    ///
    /// Limited to one connection that is never recycled: every SQLite
    /// connection to `:memory:` sees its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(())
    }

    /// Fetch the full row for an item, whatever its state
    pub async fn get_record(&self, item_id: &str) -> Result<Option<PublicationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT published_post_id, source_item_id, author_id, author_name,
                   summary, timestamp, failure_count
            FROM publications WHERE source_item_id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of rows in the ledger
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publications")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(count)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn record_from_row(row: &SqliteRow) -> Result<PublicationRecord> {
    let source_item_id: String = row.get("source_item_id");
    let raw_ts: String = row.get("timestamp");
    let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
        .map_err(|e| DbError::CorruptRow {
            item_id: source_item_id.clone(),
            reason: format!("bad timestamp {:?}: {}", raw_ts, e),
        })?
        .with_timezone(&Utc);
    let failure_count: Option<i64> = row.get("failure_count");

    Ok(PublicationRecord {
        published_post_id: row
            .get::<Option<String>, _>("published_post_id")
            .unwrap_or_default(),
        source_item_id,
        author_id: row.get("author_id"),
        author_name: row.get("author_name"),
        summary: row.get("summary"),
        timestamp,
        failure_count: failure_count.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
    })
}

#[async_trait]
impl Ledger for Database {
    async fn lookup(&self, item_id: &str) -> Result<Option<String>> {
        let post_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT published_post_id FROM publications
            WHERE source_item_id = ? AND COALESCE(published_post_id, '') <> ''
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(post_id)
    }

    async fn failure_count(&self, item_id: &str) -> Result<u32> {
        let count: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT failure_count FROM publications WHERE source_item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count.flatten().unwrap_or(0).clamp(0, u32::MAX as i64) as u32)
    }

    async fn record_success(&self, records: &[PublicationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for record in records {
            sqlx::query("DELETE FROM publications WHERE source_item_id = ?")
                .bind(&record.source_item_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;

            sqlx::query(
                r#"
                INSERT INTO publications
                    (published_post_id, source_item_id, author_id, author_name,
                     summary, timestamp, failure_count)
                VALUES (?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&record.published_post_id)
            .bind(&record.source_item_id)
            .bind(&record.author_id)
            .bind(normalize_name(&record.author_name))
            .bind(summarize(&record.summary))
            .bind(format_timestamp(&record.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn record_failure(&self, item: &SourceItem) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;
        let now = format_timestamp(&Utc::now());

        let existing: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT COALESCE(published_post_id, ''), COALESCE(failure_count, 0)
            FROM publications WHERE source_item_id = ?
            "#,
        )
        .bind(&item.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        match existing {
            Some((post_id, _)) if !post_id.is_empty() => {
                debug!("Item {} already published as {}, failure ignored", item.id, post_id);
            }
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE publications
                    SET failure_count = COALESCE(failure_count, 0) + 1, timestamp = ?
                    WHERE source_item_id = ?
                    "#,
                )
                .bind(&now)
                .bind(&item.id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            }
            None => {
                let record = PublicationRecord::first_failure(item);
                sqlx::query(
                    r#"
                    INSERT INTO publications
                        (published_post_id, source_item_id, author_id, author_name,
                         summary, timestamp, failure_count)
                    VALUES ('', ?, ?, ?, ?, ?, 1)
                    "#,
                )
                .bind(&record.source_item_id)
                .bind(&record.author_id)
                .bind(&record.author_name)
                .bind(&record.summary)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            }
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn old_records(&self, max_age_days: u32) -> Result<Vec<PublicationRecord>> {
        if max_age_days == 0 {
            return Ok(Vec::new());
        }

        let cutoff = format_timestamp(&(Utc::now() - Duration::days(i64::from(max_age_days))));

        let rows = sqlx::query(
            r#"
            SELECT published_post_id, source_item_id, author_id, author_name,
                   summary, timestamp, failure_count
            FROM publications
            WHERE timestamp < ? AND expired = 0
            ORDER BY timestamp ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn mark_expired(&self, item_id: &str) -> Result<()> {
        sqlx::query("UPDATE publications SET expired = 1 WHERE source_item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XpostError;
    use tempfile::TempDir;

    fn create_test_item(id: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            user_id: "1669879400".to_string(),
            screen_name: "测试用户".to_string(),
            text: "今天天气不错，出去走走。".to_string(),
            ..Default::default()
        }
    }

    fn aged(mut record: PublicationRecord, days: i64) -> PublicationRecord {
        record.timestamp = Utc::now() - Duration::days(days);
        record
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(XpostError::Database(_))));
    }

    #[tokio::test]
    async fn test_database_file_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("ledger.db");

        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_lookup_absent_item() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.lookup("nope").await.unwrap(), None);
        assert_eq!(db.failure_count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_success_then_lookup() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000001");

        db.record_success(&[PublicationRecord::success(&item, "111")])
            .await
            .unwrap();

        assert_eq!(db.lookup(&item.id).await.unwrap(), Some("111".to_string()));
        assert_eq!(db.failure_count(&item.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_inserts_then_increments() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000002");

        db.record_failure(&item).await.unwrap();
        assert_eq!(db.failure_count(&item.id).await.unwrap(), 1);
        assert_eq!(db.lookup(&item.id).await.unwrap(), None);

        db.record_failure(&item).await.unwrap();
        db.record_failure(&item).await.unwrap();
        assert_eq!(db.failure_count(&item.id).await.unwrap(), 3);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_success_replaces_failure_row() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000003");

        db.record_failure(&item).await.unwrap();
        db.record_failure(&item).await.unwrap();
        db.record_success(&[PublicationRecord::success(&item, "222")])
            .await
            .unwrap();

        let record = db.get_record(&item.id).await.unwrap().unwrap();
        assert!(record.is_success());
        assert_eq!(record.failure_count, 0);
        assert_eq!(record.published_post_id, "222");
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_never_touches_success_row() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000004");

        db.record_success(&[PublicationRecord::success(&item, "333")])
            .await
            .unwrap();
        db.record_failure(&item).await.unwrap();

        assert_eq!(db.lookup(&item.id).await.unwrap(), Some("333".to_string()));
        assert_eq!(db.failure_count(&item.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_success_chain_in_one_call() {
        let db = Database::in_memory().await.unwrap();
        let original = create_test_item("4890000000000005");
        let repost = create_test_item("4890000000000006");

        db.record_success(&[
            PublicationRecord::success(&original, "444"),
            PublicationRecord::success(&repost, "445"),
        ])
        .await
        .unwrap();

        assert_eq!(db.lookup(&original.id).await.unwrap(), Some("444".to_string()));
        assert_eq!(db.lookup(&repost.id).await.unwrap(), Some("445".to_string()));
    }

    #[tokio::test]
    async fn test_record_success_empty_is_noop() {
        let db = Database::in_memory().await.unwrap();
        db.record_success(&[]).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stored_fields_are_normalized_and_bounded() {
        let db = Database::in_memory().await.unwrap();
        let mut item = create_test_item("4890000000000007");
        item.screen_name = "Cafe\u{0301}".to_string();
        item.text = "长".repeat(200);

        db.record_success(&[PublicationRecord::success(&item, "555")])
            .await
            .unwrap();

        let record = db.get_record(&item.id).await.unwrap().unwrap();
        assert_eq!(record.author_name, "Caf\u{00e9}");
        assert_eq!(record.summary.chars().count(), crate::types::SUMMARY_LEN);
    }

    #[tokio::test]
    async fn test_old_records_zero_days_disabled() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000008");
        db.record_success(&[aged(PublicationRecord::success(&item, "666"), 30)])
            .await
            .unwrap();

        assert!(db.old_records(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_old_records_by_age() {
        let db = Database::in_memory().await.unwrap();
        let old = create_test_item("4890000000000009");
        let fresh = create_test_item("4890000000000010");

        db.record_success(&[
            aged(PublicationRecord::success(&old, "777"), 10),
            PublicationRecord::success(&fresh, "778"),
        ])
        .await
        .unwrap();

        let records = db.old_records(7).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_item_id, old.id);
        assert_eq!(records[0].published_post_id, "777");
    }

    #[tokio::test]
    async fn test_mark_expired_hides_from_old_records_but_keeps_dedup() {
        let db = Database::in_memory().await.unwrap();
        let item = create_test_item("4890000000000011");
        db.record_success(&[aged(PublicationRecord::success(&item, "888"), 10)])
            .await
            .unwrap();

        db.mark_expired(&item.id).await.unwrap();

        assert!(db.old_records(7).await.unwrap().is_empty());
        assert_eq!(db.lookup(&item.id).await.unwrap(), Some("888".to_string()));
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("ledger.db");
        let item = create_test_item("4890000000000012");

        {
            let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
            db.record_success(&[PublicationRecord::success(&item, "999")])
                .await
                .unwrap();
        }

        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert_eq!(db.lookup(&item.id).await.unwrap(), Some("999".to_string()));
    }
}
