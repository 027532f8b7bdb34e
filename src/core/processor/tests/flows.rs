#![cfg(unix)]

use super::{drop_incoming, envelope, fake_runner, processor, run_until_outgoing};
use crate::core::settings::{AgentConfig, RunnerConfig, RunnerFamily, Settings, TeamConfig};
use crate::core::types::RunStatus;

fn agent_with_runner(id: &str, binary: &str) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        name: None,
        runner: RunnerConfig {
            family: RunnerFamily::Framed,
            binary: binary.to_string(),
            model: None,
            fallback_model: None,
        },
    }
}

#[tokio::test]
async fn plain_message_round_trips_to_outgoing() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = fake_runner(tmp.path(), "echo from runner");

    let mut settings = Settings::default();
    settings.harness.enabled = false;
    settings.agents = vec![agent_with_runner("default", &binary)];

    let (_state, proc) = processor(settings);
    drop_incoming(&proc.inner.queue, "whatsapp_x.json", &envelope("x", "hello"));

    let outgoing = run_until_outgoing(&proc, &proc.inner.queue, 1, 15_000).await;

    let reply = outgoing
        .iter()
        .find(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("whatsapp_x_")
        })
        .expect("reply envelope");
    let parsed = proc.inner.queue.peek(reply).unwrap();
    assert_eq!(parsed.message, "echo from runner");
    assert_eq!(parsed.original_message.as_deref(), Some("hello"));

    // Nothing stuck in flight.
    assert!(proc.inner.queue.list_incoming().unwrap().is_empty());
    let processing_dir = proc
        .inner
        .queue
        .outgoing_dir()
        .parent()
        .unwrap()
        .join("processing");
    assert_eq!(std::fs::read_dir(processing_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn harness_run_is_verified_and_marked_sent() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = fake_runner(tmp.path(), "echo from runner");

    let mut settings = Settings::default();
    settings.agents = vec![agent_with_runner("default", &binary)];

    let (_state, proc) = processor(settings);
    drop_incoming(
        &proc.inner.queue,
        "whatsapp_h1.json",
        &envelope("h1", "summarize my day please"),
    );

    // Reply plus the immediate ack.
    run_until_outgoing(&proc, &proc.inner.queue, 2, 20_000).await;

    let runs = proc.inner.repo.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Sent);
    assert_eq!(run.assigned_agent, "default");

    for kind in ["risk_classified", "task_routed", "loop_completed", "verified"] {
        assert_eq!(
            proc.inner.repo.count_events(&run.run_id, kind).await.unwrap(),
            1,
            "expected one {kind} event"
        );
    }
}

#[tokio::test]
async fn team_conversation_settles_into_one_reply() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = fake_runner(tmp.path(), "Done. [@beta: check the numbers]");

    let mut settings = Settings::default();
    settings.harness.enabled = false;
    settings.agents = vec![
        agent_with_runner("default", &binary),
        agent_with_runner("alpha", &binary),
        agent_with_runner("beta", &binary),
    ];
    settings.teams = vec![TeamConfig {
        id: "research".to_string(),
        name: None,
        leader: "alpha".to_string(),
        members: vec!["beta".to_string()],
    }];

    let (_state, proc) = processor(settings);
    drop_incoming(
        &proc.inner.queue,
        "whatsapp_t1.json",
        &envelope("t1", "@research plan the launch"),
    );

    // The ack plus exactly one aggregated conversation reply.
    let outgoing = run_until_outgoing(&proc, &proc.inner.queue, 2, 30_000).await;
    let reply = outgoing
        .iter()
        .find(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("whatsapp_t1_")
        })
        .expect("aggregated reply");

    let parsed = proc.inner.queue.peek(reply).unwrap();
    assert!(parsed.message.contains("@alpha:"));
    assert!(parsed.message.contains("@beta:"));
    assert!(parsed.message.contains("------"));
    assert_eq!(
        parsed.original_message.as_deref(),
        Some("@research plan the launch")
    );

    // The conversation record is gone once pending hit zero.
    assert!(proc.inner.conversations.lock().await.is_empty());

    // The chat transcript landed under the team's directory.
    let date = chrono::Utc::now().format("%Y-%m-%d");
    let transcript = proc.inner.paths.chats_dir("research").join(format!("{date}.md"));
    let contents = std::fs::read_to_string(transcript).unwrap();
    assert!(contents.contains("plan the launch"));
    assert!(contents.contains("## @alpha"));
    assert!(contents.contains("## @beta"));
}
