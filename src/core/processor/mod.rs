mod conversation;
mod handler;

#[cfg(test)]
mod tests;

pub use conversation::{BranchResponse, Conversation, MAX_CONVERSATION_MESSAGES};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::core::harness::Harness;
use crate::core::paths::StatePaths;
use crate::core::proactive::ProactiveScheduler;
use crate::core::queue::QueueSpooler;
use crate::core::repository::Repository;
use crate::core::router::{ParsedRoute, Router};
use crate::core::settings::Settings;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// A pipeline worker with no work for this long shuts down and is GC'd.
const PIPELINE_IDLE_GRACE: Duration = Duration::from_secs(60);
const PIPELINE_DEPTH: usize = 256;

/// Everything a message handler needs, shared across pipelines.
pub struct ProcessorInner {
    pub repo: Arc<Repository>,
    pub queue: Arc<QueueSpooler>,
    pub settings: Settings,
    pub router: Router,
    pub harness: Harness,
    pub proactive: Arc<ProactiveScheduler>,
    pub paths: StatePaths,
    pub conversations: Mutex<HashMap<String, Conversation>>,
    queued: Mutex<HashSet<String>>,
    pipelines: Mutex<HashMap<String, PipelineHandle>>,
}

struct PipelineHandle {
    tx: mpsc::Sender<PathBuf>,
    generation: u64,
}

/// Polls the incoming queue and feeds per-agent sequential pipelines.
/// Pipelines for distinct agents run in parallel; within one agent,
/// messages execute in mtime order because a single worker drains the
/// channel.
pub struct QueueProcessor {
    inner: Arc<ProcessorInner>,
    next_generation: std::sync::atomic::AtomicU64,
}

impl QueueProcessor {
    pub fn new(
        repo: Arc<Repository>,
        queue: Arc<QueueSpooler>,
        settings: Settings,
        harness: Harness,
        proactive: Arc<ProactiveScheduler>,
        paths: StatePaths,
    ) -> Self {
        let router = Router::new(settings.agents.clone(), settings.teams.clone());
        Self {
            inner: Arc::new(ProcessorInner {
                repo,
                queue,
                settings,
                router,
                harness,
                proactive,
                paths,
                conversations: Mutex::new(HashMap::new()),
                queued: Mutex::new(HashSet::new()),
                pipelines: Mutex::new(HashMap::new()),
            }),
            next_generation: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Crash recovery plus the endless 1 s polling loop.
    pub async fn run(&self) -> anyhow::Result<()> {
        let recovered = self.inner.queue.recover()?;
        if recovered > 0 {
            info!("Queue processor: {} message(s) recovered", recovered);
        }

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!("Queue tick failed: {:#}", e);
            }
        }
    }

    /// One non-blocking pass: list, skip already-queued files, and hand
    /// each to its agent's pipeline.
    pub async fn tick(&self) -> anyhow::Result<()> {
        let files = self.inner.queue.list_incoming()?;
        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            {
                let queued = self.inner.queued.lock().await;
                if queued.contains(&name) {
                    continue;
                }
            }

            let agent_id = self.effective_agent(&path);
            let tx = self.pipeline_for(&agent_id).await;

            self.inner.queued.lock().await.insert(name.clone());
            if tx.send(path).await.is_err() {
                // Worker just shut down; retry next tick.
                self.inner.queued.lock().await.remove(&name);
            }
        }
        Ok(())
    }

    /// Peek the envelope to find which pipeline owns it: pre-routed agent
    /// field, then the `@agent|@team` prefix, then the default agent.
    fn effective_agent(&self, path: &std::path::Path) -> String {
        let fallback = self
            .inner
            .settings
            .default_agent()
            .map(|a| a.id.clone())
            .unwrap_or_else(|| "default".to_string());

        let Ok(envelope) = self.inner.queue.peek(path) else {
            return fallback;
        };
        if let Some(agent) = envelope.agent.as_deref() {
            if self.inner.router.has_agent(agent) {
                return agent.to_string();
            }
        }
        match self.inner.router.parse_route(&envelope.message) {
            ParsedRoute::Agent { agent_id, .. } => agent_id,
            _ => fallback,
        }
    }

    /// Get or start the sequential worker for an agent. Idle workers GC
    /// themselves after a grace period.
    async fn pipeline_for(&self, agent_id: &str) -> mpsc::Sender<PathBuf> {
        let mut pipelines = self.inner.pipelines.lock().await;
        if let Some(handle) = pipelines.get(agent_id) {
            if !handle.tx.is_closed() {
                return handle.tx.clone();
            }
            pipelines.remove(agent_id);
        }

        let (tx, mut rx) = mpsc::channel::<PathBuf>(PIPELINE_DEPTH);
        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        pipelines.insert(
            agent_id.to_string(),
            PipelineHandle {
                tx: tx.clone(),
                generation,
            },
        );

        let inner = self.inner.clone();
        let agent = agent_id.to_string();
        tokio::spawn(async move {
            loop {
                let received = tokio::time::timeout(PIPELINE_IDLE_GRACE, rx.recv()).await;
                match received {
                    Ok(Some(path)) => {
                        let name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        if let Err(e) = handler::process_file(&inner, &path).await {
                            warn!("Handler error for {}: {:#}", name, e);
                        }
                        inner.queued.lock().await.remove(&name);
                    }
                    Ok(None) => break,
                    Err(_) => break, // idle
                }
            }
            // GC the map entry, unless a newer worker already took the slot.
            let mut pipelines = inner.pipelines.lock().await;
            if pipelines
                .get(&agent)
                .is_some_and(|h| h.generation == generation)
            {
                pipelines.remove(&agent);
            }
        });

        tx
    }
}

