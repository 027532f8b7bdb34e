use std::io::Write;

use anyhow::Result;
use rusqlite::params;
use serde_json::Value;

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub id: i64,
    pub run_id: String,
    pub kind: String,
    pub payload: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct TaskStep {
    pub id: i64,
    pub run_id: String,
    pub iteration: u32,
    pub phase: String,
    pub content: String,
    pub created_at: i64,
}

impl Repository {
    /// Append a typed event row. Also mirrored to the visualizer JSONL
    /// stream when one is configured.
    pub async fn record_event(&self, run_id: &str, kind: &str, payload: &Value) -> Result<()> {
        let now = now_millis();
        {
            let db = self.conn.lock().await;
            db.execute(
                "INSERT INTO task_events (run_id, kind, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![run_id, kind, payload.to_string(), now],
            )?;
        }

        if let Some(dir) = &self.events_dir {
            let date = chrono::Utc::now().format("%Y-%m-%d");
            let line = serde_json::json!({
                "ts": now,
                "runId": run_id,
                "kind": kind,
                "payload": payload,
            });
            let path = dir.join(format!("{date}.jsonl"));
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&path)
            {
                let _ = writeln!(f, "{line}");
            }
        }
        Ok(())
    }

    pub async fn list_events(&self, run_id: &str) -> Result<Vec<TaskEvent>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, run_id, kind, payload, created_at FROM task_events
             WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let payload: String = row.get(3)?;
            Ok(TaskEvent {
                id: row.get(0)?,
                run_id: row.get(1)?,
                kind: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                created_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn count_events(&self, run_id: &str, kind: &str) -> Result<u32> {
        let db = self.conn.lock().await;
        let n: u32 = db.query_row(
            "SELECT COUNT(*) FROM task_events WHERE run_id = ?1 AND kind = ?2",
            params![run_id, kind],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub async fn last_event_at(&self, run_id: &str, kind: &str) -> Result<Option<i64>> {
        let db = self.conn.lock().await;
        let ts: Option<i64> = db.query_row(
            "SELECT MAX(created_at) FROM task_events WHERE run_id = ?1 AND kind = ?2",
            params![run_id, kind],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    pub async fn record_step(
        &self,
        run_id: &str,
        iteration: u32,
        phase: &str,
        content: &str,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO task_steps (run_id, iteration, phase, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, iteration, phase, content, now_millis()],
        )?;
        Ok(())
    }

    pub async fn list_steps(&self, run_id: &str) -> Result<Vec<TaskStep>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, run_id, iteration, phase, content, created_at FROM task_steps
             WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(TaskStep {
                id: row.get(0)?,
                run_id: row.get(1)?,
                iteration: row.get(2)?,
                phase: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
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
    async fn events_are_append_only_and_countable() {
        let repo = Repository::open_in_memory().unwrap();
        repo.record_event("r1", "risk_classified", &serde_json::json!({"level": "low"}))
            .await
            .unwrap();
        repo.record_event("r1", "proactive_outreach", &serde_json::json!({}))
            .await
            .unwrap();
        repo.record_event("r1", "proactive_outreach", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(repo.count_events("r1", "proactive_outreach").await.unwrap(), 2);
        assert_eq!(repo.count_events("r1", "risk_classified").await.unwrap(), 1);
        assert_eq!(repo.count_events("r2", "risk_classified").await.unwrap(), 0);

        let events = repo.list_events("r1").await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, "risk_classified");
    }

    #[tokio::test]
    async fn steps_preserve_order() {
        let repo = Repository::open_in_memory().unwrap();
        repo.record_step("r1", 1, "generate", "draft").await.unwrap();
        repo.record_step("r1", 1, "verify", "pass").await.unwrap();

        let steps = repo.list_steps("r1").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].phase, "generate");
        assert_eq!(steps[1].phase, "verify");
    }
}
