use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub record_id: String,
    pub user_id: String,
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub source_run_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        record_id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        key: row.get(3)?,
        value: row.get(4)?,
        confidence: row.get(5)?,
        source_run_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const COLS: &str =
    "record_id, user_id, category, key, value, confidence, source_run_id, created_at, updated_at";

impl Repository {
    /// Upsert by (user, category, key). A newer ingest only replaces the
    /// stored value when its confidence is at least as high, so repeated
    /// ingest never decreases confidence.
    pub async fn upsert_memory(&self, rec: &MemoryRecord) -> Result<()> {
        let now = now_millis();
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO memory_records (record_id, user_id, category, key, value,
                confidence, source_run_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (user_id, category, key) DO UPDATE SET
                value = CASE WHEN excluded.confidence >= memory_records.confidence
                             THEN excluded.value ELSE memory_records.value END,
                confidence = MAX(memory_records.confidence, excluded.confidence),
                source_run_id = excluded.source_run_id,
                updated_at = excluded.updated_at",
            params![
                rec.record_id,
                rec.user_id,
                rec.category,
                rec.key,
                rec.value,
                rec.confidence,
                rec.source_run_id,
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn list_memory(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        let db = self.conn.lock().await;
        let mut out = Vec::new();
        match category {
            Some(cat) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLS} FROM memory_records
                     WHERE user_id = ?1 AND category = ?2 ORDER BY updated_at DESC"
                ))?;
                let rows = stmt.query_map(params![user_id, cat], record_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLS} FROM memory_records
                     WHERE user_id = ?1 ORDER BY updated_at DESC"
                ))?;
                let rows = stmt.query_map(params![user_id], record_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Delete records whose key or value mentions the topic. Returns the
    /// number of rows removed.
    pub async fn forget_memory(&self, user_id: &str, topic: &str) -> Result<usize> {
        let needle = format!("%{}%", topic.to_lowercase());
        let db = self.conn.lock().await;
        let n = db.execute(
            "DELETE FROM memory_records
             WHERE user_id = ?1 AND (LOWER(key) LIKE ?2 OR LOWER(value) LIKE ?2)",
            params![user_id, needle],
        )?;
        Ok(n)
    }

    pub async fn upsert_daily_summary(&self, date: &str, path: &str, content: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO daily_summaries (date, path, content, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (date) DO UPDATE SET
                path = excluded.path,
                content = excluded.content",
            params![date, path, content, now_millis()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, value: &str, confidence: f64) -> MemoryRecord {
        MemoryRecord {
            record_id: format!("mem_{key}"),
            user_id: "u1".to_string(),
            category: "preferences".to_string(),
            key: key.to_string(),
            value: value.to_string(),
            confidence,
            source_run_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn higher_confidence_wins_and_never_decreases() {
        let repo = Repository::open_in_memory().unwrap();
        repo.upsert_memory(&rec("style", "bullets", 0.8)).await.unwrap();
        repo.upsert_memory(&rec("style", "prose", 0.5)).await.unwrap();

        let rows = repo.list_memory("u1", Some("preferences")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "bullets");
        assert!((rows[0].confidence - 0.8).abs() < f64::EPSILON);

        repo.upsert_memory(&rec("style", "tables", 0.9)).await.unwrap();
        let rows = repo.list_memory("u1", Some("preferences")).await.unwrap();
        assert_eq!(rows[0].value, "tables");
        assert!((rows[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn forget_matches_key_and_value() {
        let repo = Repository::open_in_memory().unwrap();
        repo.upsert_memory(&rec("style", "concise bullets", 0.8)).await.unwrap();
        repo.upsert_memory(&rec("editor", "vim", 0.8)).await.unwrap();

        let removed = repo.forget_memory("u1", "concise").await.unwrap();
        assert_eq!(removed, 1);
        let rows = repo.list_memory("u1", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "editor");
    }
}
