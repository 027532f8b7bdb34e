use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct Skill {
    pub skill_id: String,
    pub name: String,
    pub status: String,
    pub content_path: String,
    pub current_version: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct SkillVersion {
    pub skill_id: String,
    pub version: u32,
    pub content_path: String,
    pub created_at: i64,
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<Skill> {
    Ok(Skill {
        skill_id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        content_path: row.get(3)?,
        current_version: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const COLS: &str = "skill_id, name, status, content_path, current_version, created_at, updated_at";

impl Repository {
    pub async fn create_skill(&self, skill: &Skill) -> Result<()> {
        let now = now_millis();
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO skills (skill_id, name, status, content_path,
                current_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (skill_id) DO UPDATE SET
                content_path = excluded.content_path,
                updated_at = excluded.updated_at",
            params![
                skill.skill_id,
                skill.name,
                skill.status,
                skill.content_path,
                skill.current_version,
                now,
            ],
        )?;
        db.execute(
            "INSERT INTO skill_versions (skill_id, version, content_path, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (skill_id, version) DO UPDATE SET
                content_path = excluded.content_path",
            params![skill.skill_id, skill.current_version, skill.content_path, now],
        )?;
        Ok(())
    }

    pub async fn get_skill(&self, skill_id: &str) -> Result<Option<Skill>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {COLS} FROM skills WHERE skill_id = ?1"))?;
        let mut rows = stmt.query_map(params![skill_id], skill_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn get_skill_by_name(&self, name: &str) -> Result<Option<Skill>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {COLS} FROM skills WHERE name = ?1"))?;
        let mut rows = stmt.query_map(params![name], skill_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_skills(&self) -> Result<Vec<Skill>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {COLS} FROM skills ORDER BY name ASC"))?;
        let rows = stmt.query_map([], skill_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn set_skill_status(&self, skill_id: &str, status: &str) -> Result<bool> {
        let db = self.conn.lock().await;
        let n = db.execute(
            "UPDATE skills SET status = ?2, updated_at = ?3 WHERE skill_id = ?1",
            params![skill_id, status, now_millis()],
        )?;
        Ok(n > 0)
    }

    /// Add a new immutable version row and advance the skill's current
    /// content path.
    pub async fn add_skill_version(
        &self,
        skill_id: &str,
        version: u32,
        content_path: &str,
    ) -> Result<()> {
        let now = now_millis();
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO skill_versions (skill_id, version, content_path, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (skill_id, version) DO UPDATE SET
                content_path = excluded.content_path",
            params![skill_id, version, content_path, now],
        )?;
        db.execute(
            "UPDATE skills SET current_version = ?2, content_path = ?3, updated_at = ?4
             WHERE skill_id = ?1",
            params![skill_id, version, content_path, now],
        )?;
        Ok(())
    }

    pub async fn list_skill_versions(&self, skill_id: &str) -> Result<Vec<SkillVersion>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT skill_id, version, content_path, created_at FROM skill_versions
             WHERE skill_id = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![skill_id], |row| {
            Ok(SkillVersion {
                skill_id: row.get(0)?,
                version: row.get(1)?,
                content_path: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Point the skill back at a prior version's content path. The version
    /// history itself is immutable.
    pub async fn rollback_skill(&self, skill_id: &str, version: u32) -> Result<bool> {
        let target = {
            let db = self.conn.lock().await;
            let mut stmt = db.prepare(
                "SELECT content_path FROM skill_versions
                 WHERE skill_id = ?1 AND version = ?2",
            )?;
            let mut rows =
                stmt.query_map(params![skill_id, version], |row| row.get::<_, String>(0))?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        let Some(path) = target else {
            return Ok(false);
        };
        let db = self.conn.lock().await;
        let n = db.execute(
            "UPDATE skills SET current_version = ?2, content_path = ?3, updated_at = ?4
             WHERE skill_id = ?1",
            params![skill_id, version, path, now_millis()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(id: &str, name: &str) -> Skill {
        Skill {
            skill_id: id.to_string(),
            name: name.to_string(),
            status: "draft".to_string(),
            content_path: format!("skills/{id}/SKILL.md"),
            current_version: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn version_history_and_rollback() {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_skill(&draft("skill_x", "deploy helper")).await.unwrap();
        repo.add_skill_version("skill_x", 2, "skills/skill_x/SKILL.v2.md")
            .await
            .unwrap();

        let skill = repo.get_skill("skill_x").await.unwrap().unwrap();
        assert_eq!(skill.current_version, 2);

        assert!(repo.rollback_skill("skill_x", 1).await.unwrap());
        let skill = repo.get_skill("skill_x").await.unwrap().unwrap();
        assert_eq!(skill.current_version, 1);
        assert_eq!(skill.content_path, "skills/skill_x/SKILL.md");

        assert!(!repo.rollback_skill("skill_x", 9).await.unwrap());
        assert_eq!(repo.list_skill_versions("skill_x").await.unwrap().len(), 2);
    }
}
