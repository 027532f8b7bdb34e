use anyhow::Result;
use rusqlite::{params, Row};

use super::Repository;
use crate::core::types::{now_millis, RiskLevel, RunStatus, VerifierOutcome};

#[derive(Debug, Clone)]
pub struct NewTaskRun {
    pub run_id: String,
    pub task_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_id: Option<String>,
    pub conversation_id: Option<String>,
    pub branch_key: Option<String>,
    pub objective: String,
    pub assigned_agent: String,
}

#[derive(Debug, Clone)]
pub struct TaskRun {
    pub run_id: String,
    pub task_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_id: Option<String>,
    pub conversation_id: Option<String>,
    pub branch_key: Option<String>,
    pub objective: String,
    pub risk_level: RiskLevel,
    pub status: RunStatus,
    pub assigned_agent: String,
    pub loop_iteration: u32,
    pub max_iterations: u32,
    pub verifier_outcome: Option<VerifierOutcome>,
    pub result_text: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
    let risk: String = row.get("risk_level")?;
    let status: String = row.get("status")?;
    let outcome: Option<String> = row.get("verifier_outcome")?;
    Ok(TaskRun {
        run_id: row.get("run_id")?,
        task_id: row.get("task_id")?,
        channel: row.get("channel")?,
        sender: row.get("sender")?,
        sender_id: row.get("sender_id")?,
        conversation_id: row.get("conversation_id")?,
        branch_key: row.get("branch_key")?,
        objective: row.get("objective")?,
        risk_level: RiskLevel::from_status(&risk).unwrap_or(RiskLevel::Low),
        status: RunStatus::from_status(&status).unwrap_or(RunStatus::Failed),
        assigned_agent: row.get("assigned_agent")?,
        loop_iteration: row.get("loop_iteration")?,
        max_iterations: row.get("max_iterations")?,
        verifier_outcome: outcome.as_deref().and_then(VerifierOutcome::from_status),
        result_text: row.get("result_text")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Repository {
    pub async fn create_run(&self, new: &NewTaskRun) -> Result<()> {
        let now = now_millis();
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO task_runs (run_id, task_id, channel, sender, sender_id,
                conversation_id, branch_key, objective, status, assigned_agent,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'in_progress', ?9, ?10, ?10)
             ON CONFLICT (run_id) DO UPDATE SET
                objective = excluded.objective,
                updated_at = excluded.updated_at",
            params![
                new.run_id,
                new.task_id,
                new.channel,
                new.sender,
                new.sender_id,
                new.conversation_id,
                new.branch_key,
                new.objective,
                new.assigned_agent,
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn set_run_risk(
        &self,
        run_id: &str,
        risk: RiskLevel,
        max_iterations: u32,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE task_runs SET risk_level = ?2, max_iterations = ?3, updated_at = ?4
             WHERE run_id = ?1",
            params![run_id, risk.as_str(), max_iterations, now_millis()],
        )?;
        Ok(())
    }

    pub async fn update_run_loop(
        &self,
        run_id: &str,
        iteration: u32,
        outcome: VerifierOutcome,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE task_runs SET loop_iteration = ?2, verifier_outcome = ?3, updated_at = ?4
             WHERE run_id = ?1",
            params![run_id, iteration, outcome.as_str(), now_millis()],
        )?;
        Ok(())
    }

    pub async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE task_runs SET status = ?2, updated_at = ?3 WHERE run_id = ?1",
            params![run_id, status.as_str(), now_millis()],
        )?;
        Ok(())
    }

    pub async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result_text: &str,
    ) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "UPDATE task_runs SET status = ?2, result_text = ?3, updated_at = ?4
             WHERE run_id = ?1",
            params![run_id, status.as_str(), result_text, now_millis()],
        )?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<TaskRun>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare("SELECT * FROM task_runs WHERE run_id = ?1")?;
        let mut rows = stmt.query_map(params![run_id], run_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<TaskRun>> {
        let db = self.conn.lock().await;
        let mut stmt =
            db.prepare("SELECT * FROM task_runs ORDER BY created_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], run_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Mark every `needs_input` run for (channel, sender_id) older than the
    /// cutoff as rejected. Returns the superseded run ids.
    pub async fn supersede_needs_input(
        &self,
        channel: &str,
        sender_id: &str,
        cutoff_millis: i64,
    ) -> Result<Vec<String>> {
        let db = self.conn.lock().await;
        let mut ids = Vec::new();
        {
            let mut stmt = db.prepare(
                "SELECT run_id FROM task_runs
                 WHERE channel = ?1 AND sender_id = ?2 AND status = 'needs_input'
                   AND updated_at < ?3",
            )?;
            let rows = stmt.query_map(params![channel, sender_id, cutoff_millis], |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                ids.push(row?);
            }
        }
        if !ids.is_empty() {
            let now = now_millis();
            for id in &ids {
                db.execute(
                    "UPDATE task_runs SET status = 'rejected', updated_at = ?2
                     WHERE run_id = ?1",
                    params![id, now],
                )?;
            }
        }
        Ok(ids)
    }

    /// Distinct (channel, sender_id) pairs with any run since the cutoff.
    /// These are the digest targets.
    pub async fn list_recent_contacts(&self, since_millis: i64) -> Result<Vec<(String, String)>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT DISTINCT channel, sender_id FROM task_runs
             WHERE sender_id IS NOT NULL AND created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![since_millis], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Blocked runs eligible for proactive outreach: `needs_input` or
    /// `awaiting_approval`, last updated at least `min_age_millis` ago, and
    /// only the newest such run per (channel, sender_id): a run with any
    /// newer sibling from the same user is skipped.
    pub async fn list_blocked_runs_for_outreach(
        &self,
        min_age_millis: i64,
    ) -> Result<Vec<TaskRun>> {
        let cutoff = now_millis() - min_age_millis;
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT * FROM task_runs r
             WHERE r.status IN ('needs_input', 'awaiting_approval')
               AND r.updated_at <= ?1
               AND r.sender_id IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM task_runs n
                   WHERE n.channel = r.channel
                     AND n.sender_id = r.sender_id
                     AND n.created_at > r.created_at
               )
             ORDER BY r.updated_at ASC",
        )?;
        let rows = stmt.query_map(params![cutoff], run_from_row)?;
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

    fn new_run(run_id: &str, channel: &str, sender_id: &str) -> NewTaskRun {
        NewTaskRun {
            run_id: run_id.to_string(),
            task_id: format!("task_{run_id}"),
            channel: channel.to_string(),
            sender: "tester".to_string(),
            sender_id: Some(sender_id.to_string()),
            conversation_id: None,
            branch_key: None,
            objective: "do the thing".to_string(),
            assigned_agent: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_finalize_run() {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_run(&new_run("r1", "whatsapp", "u1")).await.unwrap();

        let run = repo.get_run("r1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::InProgress);

        repo.finalize_run("r1", RunStatus::Verified, "done").await.unwrap();
        let run = repo.get_run("r1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Verified);
        assert_eq!(run.result_text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn supersession_rejects_older_blocked_runs() {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_run(&new_run("old1", "whatsapp", "u1")).await.unwrap();
        repo.create_run(&new_run("old2", "whatsapp", "u1")).await.unwrap();
        repo.create_run(&new_run("other", "whatsapp", "u2")).await.unwrap();
        repo.update_run_status("old1", RunStatus::NeedsInput).await.unwrap();
        repo.update_run_status("old2", RunStatus::NeedsInput).await.unwrap();
        repo.update_run_status("other", RunStatus::NeedsInput).await.unwrap();

        let cutoff = now_millis() + 1;
        let ids = repo
            .supersede_needs_input("whatsapp", "u1", cutoff)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        assert_eq!(
            repo.get_run("old1").await.unwrap().unwrap().status,
            RunStatus::Rejected
        );
        // Different sender untouched.
        assert_eq!(
            repo.get_run("other").await.unwrap().unwrap().status,
            RunStatus::NeedsInput
        );
    }

    #[tokio::test]
    async fn outreach_skips_runs_with_newer_sibling() {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_run(&new_run("b1", "telegram", "u1")).await.unwrap();
        repo.update_run_status("b1", RunStatus::NeedsInput).await.unwrap();

        // Newer message from the same user supersedes outreach eligibility.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.create_run(&new_run("b2", "telegram", "u1")).await.unwrap();

        let blocked = repo.list_blocked_runs_for_outreach(0).await.unwrap();
        assert!(blocked.iter().all(|r| r.run_id != "b1"));

        // b2 itself is in_progress, so not eligible either.
        assert!(blocked.is_empty());
    }
}
