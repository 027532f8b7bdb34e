use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct Permission {
    pub permission_id: String,
    pub user_id: String,
    pub subject: String,
    pub action: String,
    pub resource: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Permission {
    pub fn pending(user_id: &str, subject: &str, action: &str, resource: Option<&str>) -> Self {
        Self {
            permission_id: format!("perm_{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            action: action.to_string(),
            resource: resource.map(str::to_string),
            status: "pending".to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        permission_id: row.get(0)?,
        user_id: row.get(1)?,
        subject: row.get(2)?,
        action: row.get(3)?,
        resource: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const COLS: &str =
    "permission_id, user_id, subject, action, resource, status, created_at, updated_at";

impl Repository {
    pub async fn create_permission(&self, perm: &Permission) -> Result<()> {
        let now = now_millis();
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO permissions (permission_id, user_id, subject, action,
                resource, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (permission_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                perm.permission_id,
                perm.user_id,
                perm.subject,
                perm.action,
                perm.resource,
                perm.status,
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn find_active_permission(
        &self,
        user_id: &str,
        subject: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {COLS} FROM permissions
             WHERE user_id = ?1 AND subject = ?2 AND action = ?3 AND status = 'active'
             LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![user_id, subject, action], permission_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn find_pending_permission(
        &self,
        user_id: &str,
        subject: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {COLS} FROM permissions
             WHERE user_id = ?1 AND subject = ?2 AND action = ?3 AND status = 'pending'
             ORDER BY created_at DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![user_id, subject, action], permission_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Flip a permission's status by id. Returns false when no row matched.
    pub async fn set_permission_status(&self, permission_id: &str, status: &str) -> Result<bool> {
        let db = self.conn.lock().await;
        let n = db.execute(
            "UPDATE permissions SET status = ?2, updated_at = ?3 WHERE permission_id = ?1",
            params![permission_id, status, now_millis()],
        )?;
        Ok(n > 0)
    }

    pub async fn list_permissions(&self, user_id: Option<&str>) -> Result<Vec<Permission>> {
        let db = self.conn.lock().await;
        let mut out = Vec::new();
        match user_id {
            Some(user) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLS} FROM permissions WHERE user_id = ?1 ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map(params![user], permission_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {COLS} FROM permissions ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map([], permission_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grant_flow_activates_pending_permission() {
        let repo = Repository::open_in_memory().unwrap();
        let pending = Permission::pending("u1", "npm", "execute", Some("tool"));
        let request_id = pending.permission_id.clone();
        repo.create_permission(&pending).await.unwrap();

        assert!(repo
            .find_active_permission("u1", "npm", "execute")
            .await
            .unwrap()
            .is_none());

        assert!(repo.set_permission_status(&request_id, "active").await.unwrap());
        let active = repo
            .find_active_permission("u1", "npm", "execute")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.permission_id, request_id);
    }

    #[tokio::test]
    async fn revoke_unknown_permission_returns_false() {
        let repo = Repository::open_in_memory().unwrap();
        assert!(!repo.set_permission_status("perm_missing", "revoked").await.unwrap());
    }
}
