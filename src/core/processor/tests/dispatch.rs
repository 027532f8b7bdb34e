use super::{drop_incoming, envelope, processor};
use crate::core::settings::Settings;

#[tokio::test]
async fn effective_agent_prefers_prerouted_field() {
    let mut settings = Settings::default();
    settings.agents.push(crate::core::settings::AgentConfig {
        id: "alpha".to_string(),
        name: None,
        runner: Default::default(),
    });
    let (_tmp, proc) = processor(settings);

    let mut env = envelope("m1", "@alpha hello");
    env.agent = Some("alpha".to_string());
    drop_incoming(&proc.inner.queue, "whatsapp_m1.json", &env);

    let path = proc.inner.queue.list_incoming().unwrap().remove(0);
    assert_eq!(proc.effective_agent(&path), "alpha");
}

#[tokio::test]
async fn unknown_prerouted_agent_falls_back_to_prefix_parse() {
    let mut settings = Settings::default();
    settings.agents.push(crate::core::settings::AgentConfig {
        id: "alpha".to_string(),
        name: None,
        runner: Default::default(),
    });
    let (_tmp, proc) = processor(settings);

    let mut env = envelope("m2", "@alpha do the thing");
    env.agent = Some("ghost".to_string());
    drop_incoming(&proc.inner.queue, "whatsapp_m2.json", &env);

    let path = proc.inner.queue.list_incoming().unwrap().remove(0);
    assert_eq!(proc.effective_agent(&path), "alpha");
}

#[tokio::test]
async fn plain_message_lands_on_the_default_pipeline() {
    let (_tmp, proc) = processor(Settings::default());
    drop_incoming(&proc.inner.queue, "whatsapp_m3.json", &envelope("m3", "hello"));

    let path = proc.inner.queue.list_incoming().unwrap().remove(0);
    assert_eq!(proc.effective_agent(&path), "default");
}

#[tokio::test]
async fn queued_files_are_not_double_dispatched() {
    let (_tmp, proc) = processor(Settings::default());
    drop_incoming(&proc.inner.queue, "whatsapp_m1.json", &envelope("m1", "hello"));

    // Mark as queued by hand; a tick must then skip it.
    proc.inner
        .queued
        .lock()
        .await
        .insert("whatsapp_m1.json".to_string());
    proc.tick().await.unwrap();

    // Still exactly one entry (the tick didn't re-add or process it).
    assert_eq!(proc.inner.queued.lock().await.len(), 1);
    assert_eq!(proc.inner.queue.list_incoming().unwrap().len(), 1);
}
