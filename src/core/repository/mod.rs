mod browser;
mod events;
mod memory;
mod metrics;
mod pending;
mod permissions;
mod runs;
mod skills;
mod tools;

pub use browser::{BrowserAction, BrowserApproval, BrowserSession, BrowserTab};
pub use events::{TaskEvent, TaskStep};
pub use memory::MemoryRecord;
pub use pending::{PendingMessage, DEFAULT_PENDING_TTL_MS};
pub use permissions::Permission;
pub use runs::{NewTaskRun, TaskRun};
pub use skills::{Skill, SkillVersion};
pub use tools::{tool_slug, ToolRecord};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

/// Durable state for the whole orchestrator. Single writer for every table;
/// all mutation goes through upserts keyed by natural key, plus append-only
/// event tables.
pub struct Repository {
    pub(crate) conn: Arc<Mutex<Connection>>,
    /// When set, task events are also appended to `events/<date>.jsonl`
    /// for the visualizer stream.
    pub(crate) events_dir: Option<PathBuf>,
}

impl Repository {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening state db {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        init_schema(&conn)?;
        info!("State db ready at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events_dir: None,
        })
    }

    /// Mirror task events into the append-only JSONL stream under `dir`.
    pub fn with_event_stream(mut self, dir: PathBuf) -> Self {
        self.events_dir = Some(dir);
        self
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events_dir: None,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS task_runs (
            run_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            sender TEXT NOT NULL DEFAULT '',
            sender_id TEXT,
            conversation_id TEXT,
            branch_key TEXT,
            objective TEXT NOT NULL,
            risk_level TEXT NOT NULL DEFAULT 'low',
            status TEXT NOT NULL DEFAULT 'queued',
            assigned_agent TEXT NOT NULL DEFAULT '',
            loop_iteration INTEGER NOT NULL DEFAULT 0,
            max_iterations INTEGER NOT NULL DEFAULT 1,
            verifier_outcome TEXT,
            result_text TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runs_channel_sender
            ON task_runs (channel, sender_id, status);

        CREATE TABLE IF NOT EXISTS task_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_run ON task_events (run_id, kind);

        CREATE TABLE IF NOT EXISTS task_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            iteration INTEGER NOT NULL,
            phase TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_records (
            record_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            category TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            confidence REAL NOT NULL,
            source_run_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (user_id, category, key)
        );

        CREATE TABLE IF NOT EXISTS permissions (
            permission_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_permissions_user
            ON permissions (user_id, subject, action, status);

        CREATE TABLE IF NOT EXISTS tools (
            tool_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            trust_class TEXT NOT NULL DEFAULT 'unknown',
            status TEXT NOT NULL DEFAULT 'pending',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skills (
            skill_id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'draft',
            content_path TEXT NOT NULL,
            current_version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skill_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            skill_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            content_path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (skill_id, version)
        );

        CREATE TABLE IF NOT EXISTS pending_messages (
            message_id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            sender TEXT NOT NULL DEFAULT '',
            sender_id TEXT,
            chat_ref TEXT,
            reply_ref TEXT,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metrics (
            name TEXT PRIMARY KEY,
            value REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS metric_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            delta REAL NOT NULL,
            metadata TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS browser_sessions (
            session_id TEXT PRIMARY KEY,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            profile_path TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS browser_tabs (
            tab_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            selector_trace TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tabs_run ON browser_tabs (run_id, created_at);

        CREATE TABLE IF NOT EXISTS browser_actions (
            action_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            tab_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            selector TEXT,
            value TEXT,
            url TEXT,
            risk TEXT NOT NULL DEFAULT 'low',
            requires_approval INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS browser_approvals (
            approval_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            action_id TEXT NOT NULL,
            user_id TEXT,
            reason TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            decided_at INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS browser_audits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            tab_id TEXT NOT NULL,
            action_id TEXT,
            event TEXT NOT NULL,
            before_screenshot TEXT,
            after_screenshot TEXT,
            trace TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_summaries (
            date TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )
    .context("initializing state db schema")?;
    Ok(())
}
