use anyhow::Result;
use rusqlite::params;

use super::Repository;
use crate::core::types::now_millis;

impl Repository {
    pub async fn increment_metric(
        &self,
        name: &str,
        delta: f64,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO metrics (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = metrics.value + excluded.value",
            params![name, delta],
        )?;
        db.execute(
            "INSERT INTO metric_events (name, delta, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                delta,
                metadata.map(|m| m.to_string()),
                now_millis()
            ],
        )?;
        Ok(())
    }

    pub async fn get_metric(&self, name: &str) -> Result<f64> {
        let db = self.conn.lock().await;
        let value = db
            .query_row(
                "SELECT value FROM metrics WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .unwrap_or(0.0);
        Ok(value)
    }

    pub async fn list_metrics(&self) -> Result<Vec<(String, f64)>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare("SELECT name, value FROM metrics ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate() {
        let repo = Repository::open_in_memory().unwrap();
        repo.increment_metric("responses_delivered_count", 1.0, None)
            .await
            .unwrap();
        repo.increment_metric("responses_delivered_count", 1.0, None)
            .await
            .unwrap();
        repo.increment_metric("responses_dropped_count", 1.0, None)
            .await
            .unwrap();

        assert_eq!(repo.get_metric("responses_delivered_count").await.unwrap(), 2.0);
        assert_eq!(repo.get_metric("responses_dropped_count").await.unwrap(), 1.0);
        assert_eq!(repo.get_metric("missing").await.unwrap(), 0.0);
        assert_eq!(repo.list_metrics().await.unwrap().len(), 2);
    }
}
