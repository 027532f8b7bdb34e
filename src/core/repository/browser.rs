use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::now_millis;

#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub profile_path: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct BrowserTab {
    pub tab_id: String,
    pub session_id: String,
    pub run_id: String,
    pub status: String,
    pub selector_trace: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct BrowserAction {
    pub action_id: String,
    pub run_id: String,
    pub tab_id: String,
    pub kind: String,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub url: Option<String>,
    pub risk: String,
    pub requires_approval: bool,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct BrowserApproval {
    pub approval_id: String,
    pub run_id: String,
    pub action_id: String,
    pub user_id: Option<String>,
    pub reason: Option<String>,
    pub status: String,
    pub decided_at: Option<i64>,
    pub created_at: i64,
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<BrowserSession> {
    Ok(BrowserSession {
        session_id: row.get(0)?,
        host: row.get(1)?,
        port: row.get::<_, i64>(2)? as u16,
        profile_path: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn tab_from_row(row: &Row<'_>) -> rusqlite::Result<BrowserTab> {
    Ok(BrowserTab {
        tab_id: row.get(0)?,
        session_id: row.get(1)?,
        run_id: row.get(2)?,
        status: row.get(3)?,
        selector_trace: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Repository {
    pub async fn upsert_browser_session(&self, session: &BrowserSession) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO browser_sessions (session_id, host, port, profile_path,
                status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (session_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                session.session_id,
                session.host,
                session.port as i64,
                session.profile_path,
                session.status,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn set_browser_session_status(&self, session_id: &str, status: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE browser_sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
            params![session_id, status, now_millis()],
        )?;
        Ok(())
    }

    pub async fn list_browser_sessions(&self) -> Result<Vec<BrowserSession>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT session_id, host, port, profile_path, status, created_at, updated_at
             FROM browser_sessions ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], session_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Known-active sessions whose profile path matches, newest first.
    pub async fn find_active_sessions_for_profile(
        &self,
        profile_path: &str,
    ) -> Result<Vec<BrowserSession>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT session_id, host, port, profile_path, status, created_at, updated_at
             FROM browser_sessions
             WHERE status = 'active' AND profile_path = ?1
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![profile_path], session_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn create_browser_tab(&self, tab: &BrowserTab) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO browser_tabs (tab_id, session_id, run_id, status,
                selector_trace, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                tab.tab_id,
                tab.session_id,
                tab.run_id,
                tab.status,
                tab.selector_trace,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    /// Tab status only moves active -> (error | released).
    pub async fn set_tab_status(&self, tab_id: &str, status: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE browser_tabs SET status = ?2, updated_at = ?3
             WHERE tab_id = ?1 AND status = 'active'",
            params![tab_id, status, now_millis()],
        )?;
        Ok(())
    }

    pub async fn set_tab_trace(&self, tab_id: &str, trace_json: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE browser_tabs SET selector_trace = ?2, updated_at = ?3 WHERE tab_id = ?1",
            params![tab_id, trace_json, now_millis()],
        )?;
        Ok(())
    }

    pub async fn latest_tab_for_run(&self, run_id: &str) -> Result<Option<BrowserTab>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT tab_id, session_id, run_id, status, selector_trace, created_at, updated_at
             FROM browser_tabs WHERE run_id = ?1
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![run_id], tab_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_browser_tabs(&self, run_id: Option<&str>) -> Result<Vec<BrowserTab>> {
        let db = self.conn.lock().await;
        let mut out = Vec::new();
        match run_id {
            Some(run) => {
                let mut stmt = db.prepare(
                    "SELECT tab_id, session_id, run_id, status, selector_trace,
                            created_at, updated_at
                     FROM browser_tabs WHERE run_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(params![run], tab_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT tab_id, session_id, run_id, status, selector_trace,
                            created_at, updated_at
                     FROM browser_tabs ORDER BY created_at DESC LIMIT 50",
                )?;
                let rows = stmt.query_map([], tab_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub async fn create_browser_action(&self, action: &BrowserAction) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO browser_actions (action_id, run_id, tab_id, kind, selector,
                value, url, risk, requires_approval, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                action.action_id,
                action.run_id,
                action.tab_id,
                action.kind,
                action.selector,
                action.value,
                action.url,
                action.risk,
                action.requires_approval as i64,
                action.status,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn set_browser_action_status(&self, action_id: &str, status: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE browser_actions SET status = ?2, updated_at = ?3 WHERE action_id = ?1",
            params![action_id, status, now_millis()],
        )?;
        Ok(())
    }

    pub async fn create_browser_approval(&self, approval: &BrowserApproval) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO browser_approvals (approval_id, run_id, action_id, user_id,
                reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                approval.approval_id,
                approval.run_id,
                approval.action_id,
                approval.user_id,
                approval.reason,
                approval.status,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn decide_browser_approval(&self, approval_id: &str, approve: bool) -> Result<bool> {
        let status = if approve { "approved" } else { "denied" };
        let db = self.conn.lock().await;
        let n = db.execute(
            "UPDATE browser_approvals SET status = ?2, decided_at = ?3
             WHERE approval_id = ?1 AND status = 'pending'",
            params![approval_id, status, now_millis()],
        )?;
        Ok(n > 0)
    }

    pub async fn list_browser_approvals(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<BrowserApproval>> {
        let db = self.conn.lock().await;
        let map = |row: &Row<'_>| -> rusqlite::Result<BrowserApproval> {
            Ok(BrowserApproval {
                approval_id: row.get(0)?,
                run_id: row.get(1)?,
                action_id: row.get(2)?,
                user_id: row.get(3)?,
                reason: row.get(4)?,
                status: row.get(5)?,
                decided_at: row.get(6)?,
                created_at: row.get(7)?,
            })
        };
        let mut out = Vec::new();
        match user_id {
            Some(user) => {
                let mut stmt = db.prepare(
                    "SELECT approval_id, run_id, action_id, user_id, reason, status,
                            decided_at, created_at
                     FROM browser_approvals WHERE user_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(params![user], map)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT approval_id, run_id, action_id, user_id, reason, status,
                            decided_at, created_at
                     FROM browser_approvals ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map([], map)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Every browser action gets at least one audit row; screenshots and the
    /// step's trace entry ride along.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_browser_audit(
        &self,
        run_id: &str,
        tab_id: &str,
        action_id: Option<&str>,
        event: &str,
        before_screenshot: Option<&str>,
        after_screenshot: Option<&str>,
        trace: Option<&str>,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO browser_audits (run_id, tab_id, action_id, event,
                before_screenshot, after_screenshot, trace, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                tab_id,
                action_id,
                event,
                before_screenshot,
                after_screenshot,
                trace,
                now_millis(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tab_status_transitions_are_one_way() {
        let repo = Repository::open_in_memory().unwrap();
        repo.upsert_browser_session(&BrowserSession {
            session_id: "bsess_1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9222,
            profile_path: None,
            status: "active".to_string(),
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

        repo.create_browser_tab(&BrowserTab {
            tab_id: "tab_1".to_string(),
            session_id: "bsess_1".to_string(),
            run_id: "r1".to_string(),
            status: "active".to_string(),
            selector_trace: "[]".to_string(),
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

        repo.set_tab_status("tab_1", "released").await.unwrap();
        // A released tab cannot move again.
        repo.set_tab_status("tab_1", "error").await.unwrap();
        let tab = repo.latest_tab_for_run("r1").await.unwrap().unwrap();
        assert_eq!(tab.status, "released");
    }

    #[tokio::test]
    async fn approval_decisions_are_single_shot() {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_browser_approval(&BrowserApproval {
            approval_id: "bapr_1".to_string(),
            run_id: "r1".to_string(),
            action_id: "act_1".to_string(),
            user_id: Some("u1".to_string()),
            reason: Some("payment step".to_string()),
            status: "pending".to_string(),
            decided_at: None,
            created_at: 0,
        })
        .await
        .unwrap();

        assert!(repo.decide_browser_approval("bapr_1", true).await.unwrap());
        // Already decided.
        assert!(!repo.decide_browser_approval("bapr_1", false).await.unwrap());

        let approvals = repo.list_browser_approvals(Some("u1")).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].status, "approved");
    }
}
