use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use tracing::{info, warn};

use super::conversation::Conversation;
use super::ProcessorInner;
use crate::core::queue::MessageEnvelope;
use crate::core::router::ParsedRoute;
use crate::core::settings::{AgentConfig, Settings, TeamConfig};
use crate::core::types::{now_millis, MessageIntent, RunStatus};

const SPILL_LIMIT: usize = 4000;
const SPILL_SUFFIX: &str = "\n[full response attached]";
const CANNED_ERROR: &str =
    "Sorry — something went wrong while processing your message. Please try again.";

/// Claim and fully handle one queue file. A handler error moves the file
/// back to `incoming/` for the next tick.
pub async fn process_file(ctx: &Arc<ProcessorInner>, incoming_path: &Path) -> Result<()> {
    let processing = match ctx.queue.claim(incoming_path) {
        Ok(path) => path,
        Err(e) => {
            // Transient: the file stays in incoming and is retried.
            warn!("Could not claim {}: {:#}", incoming_path.display(), e);
            return Ok(());
        }
    };

    match handle_claimed(ctx, &processing).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("Handler failed, requeueing {}: {:#}", processing.display(), e);
            if let Err(release_err) = ctx.queue.release(&processing) {
                warn!("Requeue also failed: {:#}", release_err);
            }
            Ok(())
        }
    }
}

async fn handle_claimed(ctx: &Arc<ProcessorInner>, processing: &Path) -> Result<()> {
    let mut envelope = match ctx.queue.peek(processing) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Poison file: parsing will never succeed, drop it.
            warn!("Dropping unparsable queue file {}: {:#}", processing.display(), e);
            ctx.queue.complete(processing)?;
            ctx.repo
                .increment_metric("messages_malformed_count", 1.0, None)
                .await?;
            return Ok(());
        }
    };
    let internal = envelope.is_internal();

    // In-channel operator commands answer from the repository, never the agent.
    if !internal && is_operator_command(&ctx.settings, &envelope.message) {
        let reply = operator_command_reply(ctx, &envelope).await?;
        let out = reply_envelope(&envelope, reply, format!("cmd_{}", envelope.message_id));
        ctx.queue.write_outgoing(&out)?;
        ctx.queue.complete(processing)?;
        return Ok(());
    }

    // Resolve the target agent and any team context.
    let (agent_id, team_from_route) = match envelope.agent.as_deref() {
        Some(agent) if ctx.router.has_agent(agent) => (agent.to_string(), None),
        _ => match ctx.router.parse_route(&envelope.message) {
            ParsedRoute::Agent { agent_id, team } => (agent_id, team),
            ParsedRoute::MultiAgentError => {
                // Easter egg: several agents addressed at once; the message
                // bounces back unchanged.
                let out = reply_envelope(
                    &envelope,
                    envelope.message.clone(),
                    format!("echo_{}", envelope.message_id),
                );
                ctx.queue.write_outgoing(&out)?;
                ctx.queue.complete(processing)?;
                return Ok(());
            }
            ParsedRoute::None => (
                ctx.settings
                    .default_agent()
                    .map(|a| a.id.clone())
                    .unwrap_or_else(|| "default".to_string()),
                None,
            ),
        },
    };
    let agent = ctx
        .settings
        .agent(&agent_id)
        .or_else(|| ctx.settings.default_agent())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no agents configured"))?;

    // A new external message supersedes the user's older blocked runs.
    if ctx.settings.harness.enabled && !internal {
        if let Some(sender_id) = envelope.sender_id.as_deref() {
            let superseded = ctx
                .repo
                .supersede_needs_input(&envelope.channel, sender_id, now_millis())
                .await?;
            for run_id in &superseded {
                ctx.repo
                    .record_event(
                        run_id,
                        "superseded_by_new_message",
                        &serde_json::json!({ "messageId": envelope.message_id }),
                    )
                    .await?;
            }
        }
    }

    // Team context: explicit @team routing, or the conversation an internal
    // branch belongs to.
    let team: Option<TeamConfig> = if internal {
        ctx.router.team_for_agent(&agent.id).cloned()
    } else {
        team_from_route
    };

    let conversation_id = if internal {
        envelope.conversation_id.clone()
    } else if team.is_some() {
        Some(format!("conv_{}", envelope.message_id))
    } else {
        None
    };

    // Open the conversation before the first branch runs.
    if let (false, Some(conv_id), Some(team)) = (internal, &conversation_id, &team) {
        let mut conversations = ctx.conversations.lock().await;
        conversations.entry(conv_id.clone()).or_insert_with(|| {
            Conversation::new(conv_id.clone(), team.clone(), envelope.clone())
        });
    }

    // Tell a branch when siblings are still in flight.
    if internal {
        if let Some(conv_id) = &conversation_id {
            let conversations = ctx.conversations.lock().await;
            if let Some(conv) = conversations.get(conv_id) {
                let siblings = conv.pending.saturating_sub(1);
                if siblings > 0 {
                    envelope.message.push_str(&format!(
                        "\n\n[{siblings} other teammate response(s) are still being processed; \
                         they may arrive separately]"
                    ));
                }
            }
        }
    }

    let intent = classify_intent(&envelope.message);
    if !internal
        && !envelope.is_heartbeat()
        && intent != MessageIntent::Question
        && envelope.sender_id.is_some()
    {
        let ack = reply_envelope(
            &envelope,
            ack_text(intent).to_string(),
            format!("ack_{}", envelope.message_id),
        );
        // Acks are user-initiated, so they bypass quiet hours.
        if let Err(e) = ctx.proactive.send(&ack, true) {
            warn!("Could not enqueue ack: {:#}", e);
        }
    }

    let team_note = team.as_ref().map(|t| team_note(t, &agent.id));
    let (response_text, run_id, status) = invoke(ctx, &envelope, &agent, team_note.as_deref()).await;

    match (&conversation_id, &team) {
        (Some(conv_id), Some(_)) => {
            finish_team_branch(ctx, processing, conv_id, &agent.id, run_id, response_text).await
        }
        _ => {
            finish_plain(
                ctx,
                processing,
                &envelope,
                intent,
                run_id,
                status,
                response_text,
            )
            .await
        }
    }
}

/// Harness invocation (or the bare invoker when disabled), with the canned
/// error fallback.
async fn invoke(
    ctx: &Arc<ProcessorInner>,
    envelope: &MessageEnvelope,
    agent: &AgentConfig,
    team_note: Option<&str>,
) -> (String, Option<String>, Option<RunStatus>) {
    if ctx.settings.harness.enabled {
        match ctx.harness.handle_message(envelope, agent, team_note).await {
            Ok(outcome) => (outcome.text, Some(outcome.run_id), Some(outcome.status)),
            Err(e) => {
                warn!("Harness error: {:#}", e);
                (CANNED_ERROR.to_string(), None, None)
            }
        }
    } else {
        match ctx
            .harness
            .invoker()
            .invoke(agent, &envelope.message, true, team_note)
            .await
        {
            Ok(text) => (text, None, None),
            Err(e) => {
                warn!("Invoker error: {:#}", e);
                (CANNED_ERROR.to_string(), None, None)
            }
        }
    }
}

/// Close one branch of a team conversation: record the response, fan out
/// teammate mentions, and emit the aggregated reply once every branch has
/// settled.
async fn finish_team_branch(
    ctx: &Arc<ProcessorInner>,
    processing: &Path,
    conv_id: &str,
    agent_id: &str,
    run_id: Option<String>,
    response_text: String,
) -> Result<()> {
    let (clean_text, mut files) = extract_send_files(&response_text);

    let (mentions, origin, settled) = {
        let mut conversations = ctx.conversations.lock().await;
        let Some(conv) = conversations.get_mut(conv_id) else {
            // Conversation lost (restart). The run is durable; the reply is not.
            warn!("No live conversation {}; dropping branch response", conv_id);
            ctx.repo
                .increment_metric("responses_dropped_count", 1.0, None)
                .await?;
            ctx.queue.complete(processing)?;
            return Ok(());
        };

        conv.record_response(agent_id, run_id.clone(), clean_text.clone());
        conv.attachments.append(&mut files);

        let mentions = ctx.router.extract_mentions(&clean_text, &conv.team, agent_id);
        let mut accepted = Vec::new();
        for mention in mentions {
            if conv.at_capacity() {
                warn!(
                    "Conversation {} hit its message cap; dropping mention to @{}",
                    conv_id, mention.agent_id
                );
                continue;
            }
            conv.record_mention(&mention.agent_id);
            accepted.push(mention);
        }

        let origin = conv.origin.clone();
        let settled = conv.branch_done();
        let snapshot = settled.then(|| conversations.remove(conv_id)).flatten();
        (accepted, origin, snapshot)
    };

    // Fan out accepted mentions as internal messages.
    for mention in &mentions {
        let internal = MessageEnvelope {
            channel: origin.channel.clone(),
            sender: origin.sender.clone(),
            message: mention.text.clone(),
            timestamp: now_millis(),
            message_id: format!("{}_{}", conv_id, uuid::Uuid::new_v4().simple()),
            sender_id: origin.sender_id.clone(),
            agent: Some(mention.agent_id.clone()),
            files: Vec::new(),
            conversation_id: Some(conv_id.to_string()),
            from_agent: Some(agent_id.to_string()),
            original_message: None,
        };
        ctx.queue
            .enqueue_internal(&internal, conv_id, &mention.agent_id)?;
        info!("Conversation {}: handed off to @{}", conv_id, mention.agent_id);
    }

    if let Some(conv) = settled {
        let aggregated = conv.aggregate();
        save_transcript(ctx, &conv)?;

        let out = MessageEnvelope {
            channel: conv.origin.channel.clone(),
            sender: conv.origin.sender.clone(),
            message: aggregated,
            timestamp: now_millis(),
            message_id: conv.origin.message_id.clone(),
            sender_id: conv.origin.sender_id.clone(),
            agent: None,
            files: conv.attachments.clone(),
            conversation_id: None,
            from_agent: None,
            original_message: Some(conv.origin.message.clone()),
        };
        ctx.queue.write_outgoing(&out)?;
        remember_delivery(ctx, &out).await?;
        ctx.repo
            .increment_metric("responses_delivered_count", 1.0, None)
            .await?;
        for response in &conv.responses {
            if let Some(run_id) = &response.run_id {
                let _ = ctx.repo.update_run_status(run_id, RunStatus::Sent).await;
            }
        }
        info!(
            "Conversation {} settled with {} branch(es)",
            conv.conversation_id,
            conv.responses.len()
        );
    }

    ctx.queue.complete(processing)?;
    Ok(())
}

/// Non-team reply: shape, extract attachments, spill long text, deliver.
async fn finish_plain(
    ctx: &Arc<ProcessorInner>,
    processing: &Path,
    envelope: &MessageEnvelope,
    intent: MessageIntent,
    run_id: Option<String>,
    status: Option<RunStatus>,
    response_text: String,
) -> Result<()> {
    let shaped = shape_response(intent, &response_text);
    let (clean_text, mut files) = extract_send_files(&shaped);
    let (final_text, spill) = spill_long_response(&ctx.queue, &clean_text)?;
    if let Some(path) = spill {
        files.push(path);
    }

    let out = MessageEnvelope {
        channel: envelope.channel.clone(),
        sender: envelope.sender.clone(),
        message: final_text,
        timestamp: now_millis(),
        message_id: envelope.message_id.clone(),
        sender_id: envelope.sender_id.clone(),
        agent: None,
        files,
        conversation_id: None,
        from_agent: None,
        original_message: Some(envelope.message.clone()),
    };
    ctx.queue.write_outgoing(&out)?;
    remember_delivery(ctx, &out).await?;
    ctx.repo
        .increment_metric("responses_delivered_count", 1.0, None)
        .await?;

    if let (Some(run_id), Some(RunStatus::Verified)) = (&run_id, status) {
        ctx.repo.update_run_status(run_id, RunStatus::Sent).await?;
    }

    ctx.queue.complete(processing)?;
    Ok(())
}

/// Durable hand-off so the adapter can still route this reply after a
/// restart wiped its in-memory handle map.
async fn remember_delivery(ctx: &Arc<ProcessorInner>, out: &MessageEnvelope) -> Result<()> {
    use crate::core::repository::{PendingMessage, DEFAULT_PENDING_TTL_MS};
    ctx.repo
        .remember_pending(&PendingMessage {
            message_id: out.message_id.clone(),
            channel: out.channel.clone(),
            sender: out.sender.clone(),
            sender_id: out.sender_id.clone(),
            chat_ref: out.sender_id.clone(),
            reply_ref: Some(out.message_id.clone()),
            expires_at: now_millis() + DEFAULT_PENDING_TTL_MS,
        })
        .await
}

fn save_transcript(ctx: &Arc<ProcessorInner>, conv: &Conversation) -> Result<()> {
    let dir = ctx.paths.chats_dir(&conv.team.id);
    std::fs::create_dir_all(&dir)?;
    let date = chrono::Utc::now().format("%Y-%m-%d");
    let path = dir.join(format!("{date}.md"));
    let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
    if !existing.is_empty() {
        existing.push_str("\n---\n\n");
    }
    existing.push_str(&conv.transcript());
    std::fs::write(&path, existing)?;
    Ok(())
}

fn reply_envelope(origin: &MessageEnvelope, message: String, message_id: String) -> MessageEnvelope {
    MessageEnvelope {
        channel: origin.channel.clone(),
        sender: origin.sender.clone(),
        message,
        timestamp: now_millis(),
        message_id,
        sender_id: origin.sender_id.clone(),
        agent: None,
        files: Vec::new(),
        conversation_id: None,
        from_agent: None,
        original_message: Some(origin.message.clone()),
    }
}

fn team_note(team: &TeamConfig, agent_id: &str) -> String {
    let mut teammates: Vec<&str> = Vec::new();
    if team.leader != agent_id {
        teammates.push(&team.leader);
    }
    for member in &team.members {
        if member != agent_id {
            teammates.push(member);
        }
    }
    format!(
        "You are part of team `{}`. Teammates: {}. \
         Hand work off with `[@teammate: message]`.",
        team.id,
        teammates
            .iter()
            .map(|t| format!("@{t}"))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

pub fn classify_intent(message: &str) -> MessageIntent {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();
    // Greetings and acknowledgements are conversation, not work.
    let first_word = lower
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric());
    if matches!(first_word, "hello" | "hi" | "hey" | "yo" | "thanks" | "thank" | "morning") {
        return MessageIntent::Question;
    }
    if trimmed.ends_with('?')
        || [
            "who ", "what ", "when ", "where ", "why ", "how ", "is ", "are ", "can ", "could ",
            "do ", "does ",
        ]
        .iter()
        .any(|w| lower.starts_with(w))
    {
        return MessageIntent::Question;
    }
    let browser = Regex::new(r"(?i)\b(browser|website|web page|portal|login|https?://)\b").unwrap();
    if browser.is_match(trimmed) {
        return MessageIntent::BrowserTask;
    }
    let engineering =
        Regex::new(r"(?i)\b(code|fix|build|implement|debug|test|refactor|deploy)\b").unwrap();
    if engineering.is_match(trimmed) {
        return MessageIntent::EngineeringTask;
    }
    MessageIntent::GeneralTask
}

fn ack_text(intent: MessageIntent) -> &'static str {
    match intent {
        MessageIntent::BrowserTask => "On it — I'll open the browser and get back to you.",
        MessageIntent::EngineeringTask => "On it — give me a few minutes.",
        _ => "Got it — working on it now.",
    }
}

const COMPLETION_INDICATORS: &[&str] = &[
    "done", "finished", "complete", "here", "i've", "i have", "all set", "✅", "ok",
];

/// Task-type responses lead with a completion line unless they already
/// read like one.
pub fn shape_response(intent: MessageIntent, response: &str) -> String {
    if !intent.is_task() {
        return response.to_string();
    }
    let lower = response.trim_start().to_lowercase();
    if COMPLETION_INDICATORS.iter().any(|i| lower.starts_with(i)) {
        return response.to_string();
    }
    format!("Done! Here's what happened:\n\n{response}")
}

/// Pull `[send_file: <path>]` tags out of the text into the attachment list.
pub fn extract_send_files(text: &str) -> (String, Vec<String>) {
    let re = Regex::new(r"\[send_file:\s*([^\]]+)\]").unwrap();
    let mut files = Vec::new();
    for caps in re.captures_iter(text) {
        files.push(caps.get(1).unwrap().as_str().trim().to_string());
    }
    let clean = re.replace_all(text, "").trim().to_string();
    (clean, files)
}

/// Responses over 4000 chars spill to a Markdown attachment; the message
/// keeps the head plus a short marker.
pub fn spill_long_response(
    queue: &crate::core::queue::QueueSpooler,
    text: &str,
) -> Result<(String, Option<String>)> {
    if text.chars().count() <= SPILL_LIMIT {
        return Ok((text.to_string(), None));
    }
    let name = format!(
        "response_{}_{}.md",
        now_millis(),
        &uuid::Uuid::new_v4().simple().to_string()[..6]
    );
    let path = queue.store_file(&name, text)?;

    let mut truncated: String = text.chars().take(SPILL_LIMIT).collect();
    truncated.push_str(SPILL_SUFFIX);
    Ok((truncated, Some(path.to_string_lossy().to_string())))
}

fn is_operator_command(settings: &Settings, message: &str) -> bool {
    let prefix = &settings.channels.whatsapp.self_command_prefix;
    let trimmed = message.trim();
    let stripped = trimmed.strip_prefix(prefix.as_str()).or_else(|| trimmed.strip_prefix('/'));
    match stripped {
        Some(rest) => matches!(
            rest.split_whitespace().next().unwrap_or_default(),
            "status" | "approve" | "deny" | "permissions" | "memory" | "autonomy" | "agent"
                | "team" | "reset"
        ),
        None => false,
    }
}

/// Operator commands answer from the repository, not from an agent.
async fn operator_command_reply(
    ctx: &Arc<ProcessorInner>,
    envelope: &MessageEnvelope,
) -> Result<String> {
    let trimmed = envelope.message.trim();
    let body = trimmed.trim_start_matches(
        ctx.settings.channels.whatsapp.self_command_prefix.as_str(),
    );
    let body = body.trim_start_matches('/');
    let mut parts = body.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let user = envelope
        .sender_id
        .clone()
        .unwrap_or_else(|| envelope.sender.clone());

    let reply = match command {
        "status" => {
            let runs = ctx.repo.list_runs(100).await?;
            let mut by_status: std::collections::BTreeMap<&str, usize> = Default::default();
            for run in &runs {
                *by_status.entry(run.status.as_str()).or_insert(0) += 1;
            }
            let mut out = format!(
                "Harness: {} (autonomy: {})\nRecent runs:\n",
                if ctx.settings.harness.enabled { "enabled" } else { "disabled" },
                ctx.settings.harness.autonomy
            );
            for (status, count) in by_status {
                out.push_str(&format!("- {status}: {count}\n"));
            }
            out
        }
        "approve" | "deny" => {
            let approve = command == "approve";
            match parts.next() {
                Some(id) if id.starts_with("perm_") => {
                    let status = if approve { "active" } else { "revoked" };
                    if ctx.repo.set_permission_status(id, status).await? {
                        format!("Permission {id} {}.", if approve { "granted" } else { "denied" })
                    } else {
                        format!("No pending request {id}.")
                    }
                }
                Some(id) => {
                    if ctx.repo.decide_browser_approval(id, approve).await? {
                        format!(
                            "Browser action {id} {}.",
                            if approve { "approved" } else { "denied" }
                        )
                    } else {
                        format!("No pending approval {id}.")
                    }
                }
                None => format!("Usage: /{command} <requestId>"),
            }
        }
        "permissions" => {
            let permissions = ctx.repo.list_permissions(Some(&user)).await?;
            if permissions.is_empty() {
                "No permissions on file.".to_string()
            } else {
                permissions
                    .iter()
                    .map(|p| {
                        format!(
                            "{} — {} {} ({})",
                            p.permission_id, p.subject, p.action, p.status
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "memory" => {
            let topic = parts.next();
            let records = ctx.repo.list_memory(&user, None).await?;
            let filtered: Vec<_> = records
                .iter()
                .filter(|r| {
                    topic.is_none_or(|t| {
                        let t = t.to_lowercase();
                        r.key.to_lowercase().contains(&t) || r.value.to_lowercase().contains(&t)
                    })
                })
                .take(10)
                .collect();
            if filtered.is_empty() {
                "Nothing stored yet.".to_string()
            } else {
                filtered
                    .iter()
                    .map(|r| format!("[{}] {}: {}", r.category, r.key, r.value))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "autonomy" => match parts.next() {
            None => format!("Autonomy is `{}`.", ctx.settings.harness.autonomy),
            Some(level @ ("low" | "normal" | "strict")) => {
                let mut settings = Settings::load(&ctx.paths)?;
                settings.harness.autonomy = level.to_string();
                settings.save(&ctx.paths)?;
                format!("Autonomy set to `{level}`.")
            }
            Some(other) => format!("Unknown autonomy level `{other}`. Use low|normal|strict."),
        },
        "agent" => ctx
            .settings
            .agents
            .iter()
            .map(|a| format!("@{} ({})", a.id, a.runner.binary))
            .collect::<Vec<_>>()
            .join("\n"),
        "team" => {
            if ctx.settings.teams.is_empty() {
                "No teams configured.".to_string()
            } else {
                ctx.settings
                    .teams
                    .iter()
                    .map(|t| {
                        format!("@{} — leader @{}, members: {}", t.id, t.leader, t.members.join(", "))
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "reset" => match parts.next().map(|a| a.trim_start_matches('@')) {
            Some(agent) if ctx.router.has_agent(agent) => {
                let workspace = ctx.paths.agent_workspace(agent);
                if workspace.exists() {
                    std::fs::remove_dir_all(&workspace)?;
                }
                format!("Agent @{agent} reset.")
            }
            Some(agent) => format!("Unknown agent @{agent}."),
            None => "Usage: /reset @agentId".to_string(),
        },
        other => format!("Unknown command /{other}."),
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_classification() {
        assert_eq!(classify_intent("what time is it?"), MessageIntent::Question);
        assert_eq!(classify_intent("How do I do this"), MessageIntent::Question);
        assert_eq!(classify_intent("hello"), MessageIntent::Question);
        assert_eq!(classify_intent("Thanks!"), MessageIntent::Question);
        assert_eq!(
            classify_intent("log into the vendor portal"),
            MessageIntent::BrowserTask
        );
        assert_eq!(
            classify_intent("fix the flaky test"),
            MessageIntent::EngineeringTask
        );
        assert_eq!(classify_intent("book a table"), MessageIntent::GeneralTask);
    }

    #[test]
    fn task_responses_get_a_completion_prefix() {
        let shaped = shape_response(MessageIntent::GeneralTask, "Table booked for 7pm.");
        assert!(shaped.starts_with("Table booked"));

        let shaped = shape_response(MessageIntent::GeneralTask, "The reservation is at 7pm.");
        assert!(shaped.starts_with("Done! Here's what happened:"));

        // Questions are never prefixed.
        let shaped = shape_response(MessageIntent::Question, "It's at 7pm.");
        assert_eq!(shaped, "It's at 7pm.");
    }

    #[test]
    fn send_file_tags_become_attachments() {
        let (clean, files) =
            extract_send_files("Report ready. [send_file: /tmp/report.pdf] Enjoy!");
        assert_eq!(files, vec!["/tmp/report.pdf"]);
        assert!(!clean.contains("send_file"));
        assert!(clean.contains("Report ready."));
    }

    #[test]
    fn long_responses_spill_to_an_attachment() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = crate::core::paths::StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let queue = crate::core::queue::QueueSpooler::new(&paths);

        let long = "x".repeat(SPILL_LIMIT + 500);
        let (text, spill) = spill_long_response(&queue, &long).unwrap();
        assert!(text.chars().count() <= SPILL_LIMIT + 40);
        assert!(text.ends_with(SPILL_SUFFIX));
        let spill = spill.unwrap();
        assert!(spill.ends_with(".md"));
        assert_eq!(std::fs::read_to_string(spill).unwrap(), long);

        // Short responses pass through untouched.
        let (text, spill) = spill_long_response(&queue, "short").unwrap();
        assert_eq!(text, "short");
        assert!(spill.is_none());
    }

    #[test]
    fn operator_commands_are_detected() {
        let settings = Settings::default();
        assert!(is_operator_command(&settings, "/status"));
        assert!(is_operator_command(&settings, "  /approve perm_1"));
        assert!(!is_operator_command(&settings, "status report please"));
        assert!(!is_operator_command(&settings, "/unknowncmd"));
    }
}
