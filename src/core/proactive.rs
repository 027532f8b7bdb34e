use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::memory::build_daily_summary;
use crate::core::paths::StatePaths;
use crate::core::queue::{MessageEnvelope, QueueSpooler};
use crate::core::repository::Repository;
use crate::core::settings::Settings;
use crate::core::types::{now_millis, RunStatus};

const OUTREACH_MIN_AGE_MS: i64 = 10 * 60 * 1000;
const OUTREACH_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;
const OUTREACH_MAX_ATTEMPTS: u32 = 3;
const OUTREACH_SPACING_MS: i64 = 4 * 60 * 60 * 1000;
const DIGEST_LOOKBACK_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProactiveState {
    /// `channel|senderId` -> last digest date (`YYYY-MM-DD`).
    #[serde(default)]
    digests: HashMap<String, String>,
}

/// Quiet-hours queue, daily digest, and blocked-run outreach. Ticks every
/// 60 s under a single-flight guard.
pub struct ProactiveScheduler {
    repo: Arc<Repository>,
    queue: Arc<QueueSpooler>,
    settings: Settings,
    paths: StatePaths,
    running: AtomicBool,
}

impl ProactiveScheduler {
    pub fn new(
        repo: Arc<Repository>,
        queue: Arc<QueueSpooler>,
        settings: Settings,
        paths: StatePaths,
    ) -> Self {
        Self {
            repo,
            queue,
            settings,
            paths,
            running: AtomicBool::new(false),
        }
    }

    /// One scheduler pass. Re-entrant ticks are dropped, never queued.
    pub async fn tick(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.tick_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self) -> Result<()> {
        let now_local = Local::now();

        if !self.in_quiet_hours(now_local.time()) {
            let flushed = self.flush_deferred()?;
            if flushed > 0 {
                info!("Proactive: flushed {} deferred message(s)", flushed);
            }
        }

        if let Some(digest_time) = self.settings.harness.digest_time.as_deref() {
            if now_local.format("%H:%M").to_string() == digest_time {
                self.run_digest().await?;
            }
        }

        self.outreach().await?;
        self.repo.purge_expired_pending().await?;
        Ok(())
    }

    /// Queue a proactive message. Urgent messages (user-initiated acks)
    /// bypass quiet hours; everything else defers until the window ends.
    pub fn send(&self, envelope: &MessageEnvelope, urgent: bool) -> Result<()> {
        if !urgent && self.in_quiet_hours(Local::now().time()) {
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.paths.deferred_outbox())?;
            writeln!(f, "{}", serde_json::to_string(envelope)?)?;
            return Ok(());
        }
        self.queue.write_outgoing(envelope)?;
        Ok(())
    }

    pub fn in_quiet_hours(&self, t: NaiveTime) -> bool {
        self.settings
            .quiet_hours()
            .map(|window| window.contains(t))
            .unwrap_or(false)
    }

    /// Move every deferred envelope into the outgoing queue and truncate
    /// the buffer.
    fn flush_deferred(&self) -> Result<usize> {
        let path = self.paths.deferred_outbox();
        if !path.exists() {
            return Ok(0);
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut flushed = 0;
        for line in raw.lines() {
            match serde_json::from_str::<MessageEnvelope>(line) {
                Ok(envelope) => {
                    self.queue.write_outgoing(&envelope)?;
                    flushed += 1;
                }
                Err(e) => warn!("Dropping unreadable deferred message: {}", e),
            }
        }
        std::fs::write(&path, "")?;
        Ok(flushed)
    }

    /// Build today's summary and enqueue it once per target per day.
    async fn run_digest(&self) -> Result<()> {
        let today = chrono::Utc::now().date_naive();
        let today_str = today.format("%Y-%m-%d").to_string();
        let mut state = self.load_state();

        let targets = self
            .repo
            .list_recent_contacts(now_millis() - DIGEST_LOOKBACK_MS)
            .await?;
        if targets.is_empty() {
            return Ok(());
        }

        let summary = build_daily_summary(&self.repo, &self.paths, today).await?;
        let mut sent = 0;
        for (channel, sender_id) in targets {
            if channel == "heartbeat" {
                continue;
            }
            let key = format!("{channel}|{sender_id}");
            if state.digests.get(&key) == Some(&today_str) {
                continue;
            }
            let envelope = MessageEnvelope {
                channel: channel.clone(),
                sender: sender_id.clone(),
                message: summary.clone(),
                timestamp: now_millis(),
                message_id: format!("digest_{today_str}_{sender_id}"),
                sender_id: Some(sender_id.clone()),
                agent: None,
                files: Vec::new(),
                conversation_id: None,
                from_agent: None,
                original_message: None,
            };
            self.send(&envelope, false)?;
            state.digests.insert(key, today_str.clone());
            sent += 1;
        }
        if sent > 0 {
            info!("Proactive: queued {} digest(s)", sent);
            self.save_state(&state)?;
        }
        Ok(())
    }

    /// Remind users about their newest blocked run: at least 10 minutes
    /// old, younger than 24 hours, at most 3 reminders, 4 hours apart.
    async fn outreach(&self) -> Result<()> {
        let blocked = self
            .repo
            .list_blocked_runs_for_outreach(OUTREACH_MIN_AGE_MS)
            .await?;
        for run in blocked {
            if now_millis() - run.updated_at > OUTREACH_MAX_AGE_MS {
                continue;
            }
            let attempts = self.repo.count_events(&run.run_id, "proactive_outreach").await?;
            if attempts >= OUTREACH_MAX_ATTEMPTS {
                continue;
            }
            if let Some(last) = self.repo.last_event_at(&run.run_id, "proactive_outreach").await? {
                if now_millis() - last < OUTREACH_SPACING_MS {
                    continue;
                }
            }

            let Some(sender_id) = run.sender_id.clone() else {
                continue;
            };
            let objective_short: String = run.objective.chars().take(120).collect();
            let message = match run.status {
                RunStatus::AwaitingApproval => format!(
                    "Still waiting on your approval for: \"{objective_short}\". \
                     Reply /approve <id> or /deny <id> when you're ready."
                ),
                _ => format!(
                    "Quick nudge — I still need your input on: \"{objective_short}\". \
                     {}",
                    run.result_text.as_deref().unwrap_or("")
                ),
            };

            let envelope = MessageEnvelope {
                channel: run.channel.clone(),
                sender: run.sender.clone(),
                message: message.trim().to_string(),
                timestamp: now_millis(),
                message_id: format!("outreach_{}_{}", run.run_id, attempts + 1),
                sender_id: Some(sender_id),
                agent: None,
                files: Vec::new(),
                conversation_id: None,
                from_agent: None,
                original_message: None,
            };
            self.send(&envelope, false)?;
            self.repo
                .record_event(
                    &run.run_id,
                    "proactive_outreach",
                    &serde_json::json!({ "attempt": attempts + 1, "status": run.status.as_str() }),
                )
                .await?;
            info!(
                "Proactive: outreach {}/{} for run {}",
                attempts + 1,
                OUTREACH_MAX_ATTEMPTS,
                run.run_id
            );
        }
        Ok(())
    }

    fn load_state(&self) -> ProactiveState {
        std::fs::read_to_string(self.paths.proactive_state())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_state(&self, state: &ProactiveState) -> Result<()> {
        let path = self.paths.proactive_state();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repository::NewTaskRun;
    use crate::core::settings::QuietHoursConfig;

    fn scheduler(settings: Settings) -> (tempfile::TempDir, ProactiveScheduler) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let queue = Arc::new(QueueSpooler::new(&paths));
        (
            tmp,
            ProactiveScheduler::new(repo, queue, settings, paths),
        )
    }

    fn envelope(id: &str) -> MessageEnvelope {
        MessageEnvelope {
            channel: "whatsapp".to_string(),
            sender: "t".to_string(),
            message: "reminder".to_string(),
            timestamp: now_millis(),
            message_id: id.to_string(),
            sender_id: Some("u".to_string()),
            agent: None,
            files: Vec::new(),
            conversation_id: None,
            from_agent: None,
            original_message: None,
        }
    }

    fn always_quiet() -> Settings {
        let mut settings = Settings::default();
        settings.harness.quiet_hours = Some(QuietHoursConfig {
            start: "00:00".to_string(),
            end: "23:59".to_string(),
        });
        settings
    }

    #[test]
    fn non_urgent_messages_defer_during_quiet_hours() {
        let (_tmp, sched) = scheduler(always_quiet());
        sched.send(&envelope("m1"), false).unwrap();

        // Nothing delivered, one line buffered.
        assert!(std::fs::read_dir(sched.queue.outgoing_dir()).unwrap().next().is_none());
        let buffered = std::fs::read_to_string(sched.paths.deferred_outbox()).unwrap();
        assert_eq!(buffered.lines().count(), 1);
    }

    #[test]
    fn urgent_messages_bypass_quiet_hours() {
        let (_tmp, sched) = scheduler(always_quiet());
        sched.send(&envelope("m2"), true).unwrap();
        assert_eq!(
            std::fs::read_dir(sched.queue.outgoing_dir()).unwrap().count(),
            1
        );
    }

    #[tokio::test]
    async fn deferred_messages_flush_after_quiet_hours() {
        let (_tmp, sched) = scheduler(always_quiet());
        sched.send(&envelope("m3"), false).unwrap();
        sched.send(&envelope("m4"), false).unwrap();

        // Outside quiet hours the tick flushes the buffer.
        let flushed = sched.flush_deferred().unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(
            std::fs::read_dir(sched.queue.outgoing_dir()).unwrap().count(),
            2
        );
        assert_eq!(sched.flush_deferred().unwrap(), 0);
    }

    #[tokio::test]
    async fn outreach_marks_event_and_respects_attempt_cap() {
        let (_tmp, sched) = scheduler(Settings::default());

        sched
            .repo
            .create_run(&NewTaskRun {
                run_id: "blocked1".to_string(),
                task_id: "t1".to_string(),
                channel: "whatsapp".to_string(),
                sender: "t".to_string(),
                sender_id: Some("u".to_string()),
                conversation_id: None,
                branch_key: None,
                objective: "book the flight".to_string(),
                assigned_agent: "default".to_string(),
            })
            .await
            .unwrap();
        sched
            .repo
            .update_run_status("blocked1", RunStatus::NeedsInput)
            .await
            .unwrap();
        // Pretend three reminders already went out.
        for i in 0..3 {
            sched
                .repo
                .record_event("blocked1", "proactive_outreach", &serde_json::json!({"attempt": i}))
                .await
                .unwrap();
        }

        // min_age=10min keeps a fresh run out anyway; call outreach directly
        // with the run made eligible by age-zero query.
        let blocked = sched.repo.list_blocked_runs_for_outreach(0).await.unwrap();
        assert_eq!(blocked.len(), 1);
        sched.outreach().await.unwrap();
        // Cap reached: still exactly 3 events.
        assert_eq!(
            sched
                .repo
                .count_events("blocked1", "proactive_outreach")
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn tick_is_single_flight() {
        let (_tmp, sched) = scheduler(Settings::default());
        sched.running.store(true, Ordering::SeqCst);
        // A tick while one is in flight is a no-op, not an error.
        sched.tick().await.unwrap();
        assert!(sched.running.load(Ordering::SeqCst));
    }
}
