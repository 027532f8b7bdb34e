mod dispatch;
mod flows;

use std::sync::Arc;

use crate::core::harness::Harness;
use crate::core::paths::StatePaths;
use crate::core::proactive::ProactiveScheduler;
use crate::core::queue::{MessageEnvelope, QueueSpooler};
use crate::core::repository::Repository;
use crate::core::settings::Settings;
use crate::core::types::now_millis;

use super::QueueProcessor;

pub(super) fn processor(settings: Settings) -> (tempfile::TempDir, QueueProcessor) {
    let tmp = tempfile::tempdir().unwrap();
    let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let queue = Arc::new(QueueSpooler::new(&paths));
    let harness = Harness::new(repo.clone(), paths.clone(), settings.clone());
    let proactive = Arc::new(ProactiveScheduler::new(
        repo.clone(),
        queue.clone(),
        settings.clone(),
        paths.clone(),
    ));
    (
        tmp,
        QueueProcessor::new(repo, queue, settings, harness, proactive, paths),
    )
}

pub(super) fn envelope(message_id: &str, message: &str) -> MessageEnvelope {
    MessageEnvelope {
        channel: "whatsapp".to_string(),
        sender: "Toni".to_string(),
        message: message.to_string(),
        timestamp: now_millis(),
        message_id: message_id.to_string(),
        sender_id: Some("u".to_string()),
        agent: None,
        files: Vec::new(),
        conversation_id: None,
        from_agent: None,
        original_message: None,
    }
}

pub(super) fn drop_incoming(queue: &QueueSpooler, name: &str, env: &MessageEnvelope) {
    let dir = queue.outgoing_dir().parent().unwrap().join("incoming");
    std::fs::write(dir.join(name), serde_json::to_string(env).unwrap()).unwrap();
}

/// A fake framed model runner that echoes one agent_message frame.
#[cfg(unix)]
pub(super) fn fake_runner(dir: &std::path::Path, reply: &str) -> String {
    let path = dir.join("fake_runner.sh");
    let frame = serde_json::json!({ "msg": { "type": "agent_message", "text": reply } });
    // Single-quote the JSON for the shell; replies in tests avoid quotes.
    std::fs::write(&path, format!("#!/bin/sh\necho '{frame}'\n")).unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_string_lossy().to_string()
}

/// Drive ticks until `outgoing/` holds `want` files or the deadline hits.
pub(super) async fn run_until_outgoing(
    proc: &QueueProcessor,
    queue: &QueueSpooler,
    want: usize,
    deadline_ms: u64,
) -> Vec<std::path::PathBuf> {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(deadline_ms);
    loop {
        proc.tick().await.unwrap();
        let outgoing: Vec<_> = std::fs::read_dir(queue.outgoing_dir())
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        if outgoing.len() >= want {
            return outgoing;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "expected {} outgoing file(s), found {} before deadline",
                want,
                outgoing.len()
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
