use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub tool_id: String,
    pub name: String,
    pub source: String,
    pub trust_class: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Slug used as the natural key for a tool name.
pub fn tool_slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

fn tool_from_row(row: &Row<'_>) -> rusqlite::Result<ToolRecord> {
    let metadata: String = row.get(5)?;
    Ok(ToolRecord {
        tool_id: row.get(0)?,
        name: row.get(1)?,
        source: row.get(2)?,
        trust_class: row.get(3)?,
        status: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const COLS: &str = "tool_id, name, source, trust_class, status, metadata, created_at, updated_at";

impl Repository {
    /// Register a tool if unseen; an existing row keeps its status and
    /// trust class (re-registration must not resurrect a blocked tool).
    pub async fn upsert_tool(&self, tool: &ToolRecord) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO tools (tool_id, name, source, trust_class, status,
                metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (tool_id) DO UPDATE SET
                source = excluded.source,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                tool.tool_id,
                tool.name,
                tool.source,
                tool.trust_class,
                tool.status,
                tool.metadata.to_string(),
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_tool(&self, tool_id: &str) -> Result<Option<ToolRecord>> {
        let db = self.conn.lock().await;
        let mut stmt =
            db.prepare(&format!("SELECT {COLS} FROM tools WHERE tool_id = ?1"))?;
        let mut rows = stmt.query_map(params![tool_id], tool_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolRecord>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {COLS} FROM tools ORDER BY name ASC"))?;
        let rows = stmt.query_map([], tool_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn set_tool_status(&self, name: &str, status: &str) -> Result<bool> {
        let db = self.conn.lock().await;
        let n = db.execute(
            "UPDATE tools SET status = ?2, updated_at = ?3 WHERE tool_id = ?1",
            params![tool_slug(name), status, now_millis()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_normalizes_names() {
        assert_eq!(tool_slug("npm"), "npm");
        assert_eq!(tool_slug("My Tool!"), "my-tool");
        assert_eq!(tool_slug("  pip3  "), "pip3");
    }

    #[tokio::test]
    async fn reregistration_keeps_blocked_status() {
        let repo = Repository::open_in_memory().unwrap();
        let tool = ToolRecord {
            tool_id: tool_slug("npm"),
            name: "npm".to_string(),
            source: "builtin".to_string(),
            trust_class: "mainstream".to_string(),
            status: "approved".to_string(),
            metadata: serde_json::json!({}),
            created_at: 0,
            updated_at: 0,
        };
        repo.upsert_tool(&tool).await.unwrap();
        repo.set_tool_status("npm", "blocked").await.unwrap();

        // Second registration of the same tool must not unblock it.
        repo.upsert_tool(&tool).await.unwrap();
        let row = repo.get_tool("npm").await.unwrap().unwrap();
        assert_eq!(row.status, "blocked");
    }
}
