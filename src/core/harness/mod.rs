pub mod classify;
pub mod gate;
pub mod loop_engine;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use classify::Classifier;
pub use gate::{GateDecision, PublishGate};
pub use loop_engine::{run_loop, LoopDriver, LoopResult, Verdict};
pub use verifier::Verifier;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::core::browser::BrowserExecutor;
use crate::core::invoker::{AgentInvoker, InvokeError};
use crate::core::memory::MemoryService;
use crate::core::paths::StatePaths;
use crate::core::queue::MessageEnvelope;
use crate::core::repository::{NewTaskRun, Repository};
use crate::core::settings::{AgentConfig, Settings};
use crate::core::skills::{AutoDraftSignal, SkillsService};
use crate::core::tooling::ToolingExecutor;
use crate::core::types::{now_millis, ExecStatus, RunStatus, TaskRoute};

/// The finished harness pass for one message and one agent.
#[derive(Debug, Clone)]
pub struct HarnessOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub text: String,
    pub attachments: Vec<String>,
}

/// Top-level orchestrator: classify, route, drive the loop, gate, dispatch
/// to the route executor, and persist the run.
pub struct Harness {
    repo: Arc<Repository>,
    settings: Settings,
    invoker: Arc<AgentInvoker>,
    classifier: Classifier,
    verifier: Verifier,
    gate: PublishGate,
    tooling: ToolingExecutor,
    browser: BrowserExecutor,
    memory: MemoryService,
    skills: SkillsService,
}

impl Harness {
    pub fn new(repo: Arc<Repository>, paths: StatePaths, settings: Settings) -> Self {
        let invoker = Arc::new(AgentInvoker::new(paths.clone()));
        Self {
            verifier: Verifier::new(invoker.clone()),
            gate: PublishGate::new(repo.clone()),
            tooling: ToolingExecutor::new(repo.clone()),
            browser: BrowserExecutor::new(
                repo.clone(),
                paths.clone(),
                settings.harness.browser.clone(),
            ),
            memory: MemoryService::new(repo.clone(), paths.clone()),
            skills: SkillsService::new(repo.clone(), paths),
            classifier: Classifier::new(),
            invoker,
            repo,
            settings,
        }
    }

    pub fn invoker(&self) -> Arc<AgentInvoker> {
        self.invoker.clone()
    }

    /// Run the full harness for one message (a non-team message or a single
    /// team branch). Always returns an outcome; internal failures become a
    /// `failed` run with user-facing text.
    pub async fn handle_message(
        &self,
        envelope: &MessageEnvelope,
        agent: &AgentConfig,
        team_note: Option<&str>,
    ) -> Result<HarnessOutcome> {
        let run_id = build_run_id(envelope, &agent.id);
        let user_id = envelope
            .sender_id
            .clone()
            .unwrap_or_else(|| envelope.sender.clone());
        let objective = envelope.message.clone();

        self.repo
            .create_run(&NewTaskRun {
                run_id: run_id.clone(),
                task_id: envelope.message_id.clone(),
                channel: envelope.channel.clone(),
                sender: envelope.sender.clone(),
                sender_id: envelope.sender_id.clone(),
                conversation_id: envelope.conversation_id.clone(),
                branch_key: Some(agent.id.clone()),
                objective: objective.clone(),
                assigned_agent: agent.id.clone(),
            })
            .await?;

        match self
            .drive_run(&run_id, envelope, agent, &user_id, &objective, team_note)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Run {} failed: {:#}", run_id, e);
                let text = translate_failure(&e);
                self.repo
                    .finalize_run(&run_id, RunStatus::Failed, &text)
                    .await?;
                self.repo
                    .record_event(
                        &run_id,
                        "failed",
                        &serde_json::json!({ "error": format!("{e:#}") }),
                    )
                    .await?;
                self.repo
                    .increment_metric("tasks_failed_count", 1.0, None)
                    .await?;
                Ok(HarnessOutcome {
                    run_id,
                    status: RunStatus::Failed,
                    text,
                    attachments: Vec::new(),
                })
            }
        }
    }

    async fn drive_run(
        &self,
        run_id: &str,
        envelope: &MessageEnvelope,
        agent: &AgentConfig,
        user_id: &str,
        objective: &str,
        team_note: Option<&str>,
    ) -> Result<HarnessOutcome> {
        let risk = self.classifier.classify_risk(objective);
        self.repo
            .set_run_risk(run_id, risk.level, risk.level.loop_budget())
            .await?;
        self.repo
            .record_event(
                run_id,
                "risk_classified",
                &serde_json::json!({ "level": risk.level.as_str(), "reasons": risk.reasons }),
            )
            .await?;

        let route = self.classifier.determine_route(objective);
        self.repo
            .record_event(
                run_id,
                "task_routed",
                &serde_json::json!({ "route": route.route.as_str(), "reasons": route.reasons }),
            )
            .await?;

        // Browser work goes to the Claude-family agent when configured.
        let effective_agent = if route.route == TaskRoute::Browser
            && self.settings.harness.browser.use_claude_chrome
        {
            self.settings.claude_agent().unwrap_or(agent)
        } else {
            agent
        };

        let memory_context = self.memory.retrieve_context(user_id, objective).await?;
        let prompt = match &memory_context {
            Some(context) => format!("{context}\n{objective}"),
            None => objective.to_string(),
        };

        let driver = RunDriver {
            invoker: &self.invoker,
            verifier: &self.verifier,
            agent: effective_agent,
            objective: objective.to_string(),
            prompt,
            team_note: team_note.map(str::to_string),
        };
        let loop_result = run_loop(&self.repo, run_id, risk.level, &driver).await?;

        // Durable facts come out of every exchange, whatever the route.
        self.memory
            .ingest(
                user_id,
                run_id,
                &envelope.channel,
                &format!("{objective}\n{}", loop_result.output),
            )
            .await?;

        if loop_result.exhausted {
            let question = clarifying_question(route.route, &loop_result);
            self.repo
                .record_event(
                    run_id,
                    "needs_input",
                    &serde_json::json!({ "question": question, "iterations": loop_result.iterations }),
                )
                .await?;
            self.repo
                .finalize_run(run_id, RunStatus::NeedsInput, &question)
                .await?;
            return Ok(HarnessOutcome {
                run_id: run_id.to_string(),
                status: RunStatus::NeedsInput,
                text: question,
                attachments: Vec::new(),
            });
        }

        // The browser route bypasses the publish gate; it approves
        // per-action instead.
        if route.route != TaskRoute::Browser {
            let decision = self
                .gate
                .evaluate(run_id, Some(user_id), &loop_result.output, route.route, risk.level)
                .await?;
            if !decision.allow {
                let text = decision.reason.unwrap_or_else(|| {
                    "This needs your approval before I can act on it.".to_string()
                });
                self.repo
                    .record_event(
                        run_id,
                        "awaiting_approval",
                        &serde_json::json!({ "requestId": decision.request_id }),
                    )
                    .await?;
                self.repo
                    .finalize_run(run_id, RunStatus::AwaitingApproval, &text)
                    .await?;
                return Ok(HarnessOutcome {
                    run_id: run_id.to_string(),
                    status: RunStatus::AwaitingApproval,
                    text,
                    attachments: Vec::new(),
                });
            }
        }

        let (status, text, attachments) = self
            .dispatch(run_id, user_id, objective, route.route, &loop_result)
            .await?;

        if status == RunStatus::Verified {
            self.repo
                .record_event(
                    run_id,
                    "verified",
                    &serde_json::json!({ "iterations": loop_result.iterations }),
                )
                .await?;
            self.skills
                .maybe_autodraft(&AutoDraftSignal {
                    user_id,
                    run_id,
                    objective,
                    route: route.route,
                    verified: true,
                })
                .await?;
            self.repo
                .increment_metric("tasks_completed_count", 1.0, None)
                .await?;
        } else if status == RunStatus::Failed {
            self.repo
                .record_event(run_id, "failed", &serde_json::json!({ "route": route.route.as_str() }))
                .await?;
            self.repo
                .increment_metric("tasks_failed_count", 1.0, None)
                .await?;
        }

        self.repo.finalize_run(run_id, status, &text).await?;
        info!(
            "Run {} finished: {} via {}",
            run_id,
            status.as_str(),
            route.route.as_str()
        );
        Ok(HarnessOutcome {
            run_id: run_id.to_string(),
            status,
            text,
            attachments,
        })
    }

    /// Route-specific execution after a passing loop.
    async fn dispatch(
        &self,
        run_id: &str,
        user_id: &str,
        objective: &str,
        route: TaskRoute,
        loop_result: &LoopResult,
    ) -> Result<(RunStatus, String, Vec<String>)> {
        match route {
            TaskRoute::Agent => Ok((
                RunStatus::Verified,
                loop_result.output.clone(),
                Vec::new(),
            )),
            TaskRoute::Memory => {
                // Ingest already ran; answer with the confirmation text.
                Ok((RunStatus::Verified, loop_result.output.clone(), Vec::new()))
            }
            TaskRoute::Tooling => {
                let exec = self
                    .tooling
                    .execute(run_id, user_id, objective, &loop_result.output)
                    .await?;
                self.repo
                    .record_event(
                        run_id,
                        "tooling_execution",
                        &serde_json::json!({ "status": format!("{:?}", exec.status) }),
                    )
                    .await?;
                Ok(map_exec(run_id, &self.repo, exec).await?)
            }
            TaskRoute::Browser => {
                let exec = self
                    .browser
                    .execute(run_id, user_id, objective, &loop_result.output)
                    .await?;
                self.repo
                    .record_event(
                        run_id,
                        "browser_execution",
                        &serde_json::json!({
                            "status": format!("{:?}", exec.status),
                            "artifacts": exec.artifacts.len(),
                        }),
                    )
                    .await?;
                Ok(map_exec(run_id, &self.repo, exec).await?)
            }
        }
    }
}

async fn map_exec(
    run_id: &str,
    repo: &Arc<Repository>,
    exec: crate::core::types::ExecOutcome,
) -> Result<(RunStatus, String, Vec<String>)> {
    let status = match exec.status {
        ExecStatus::Completed => RunStatus::Verified,
        ExecStatus::NeedsApproval => {
            repo.record_event(
                run_id,
                "awaiting_approval",
                &serde_json::json!({ "requestId": exec.request_id }),
            )
            .await?;
            RunStatus::AwaitingApproval
        }
        ExecStatus::NeedsInput => {
            repo.record_event(run_id, "needs_input", &serde_json::json!({}))
                .await?;
            RunStatus::NeedsInput
        }
        ExecStatus::Failed => RunStatus::Failed,
    };
    Ok((status, exec.message, exec.artifacts))
}

struct RunDriver<'a> {
    invoker: &'a Arc<AgentInvoker>,
    verifier: &'a Verifier,
    agent: &'a AgentConfig,
    objective: String,
    prompt: String,
    team_note: Option<String>,
}

#[async_trait]
impl LoopDriver for RunDriver<'_> {
    async fn generate(&self) -> Result<String> {
        Ok(self
            .invoker
            .invoke(self.agent, &self.prompt, true, self.team_note.as_deref())
            .await?)
    }

    async fn verify(&self, candidate: &str, iteration: u32) -> Result<Verdict> {
        Ok(self
            .verifier
            .verify(self.agent, &self.objective, candidate, iteration)
            .await)
    }

    async fn revise(&self, candidate: &str, verdict: &Verdict, _iteration: u32) -> Result<String> {
        let findings = if verdict.findings.is_empty() {
            "- the answer did not hold up to verification".to_string()
        } else {
            verdict
                .findings
                .iter()
                .map(|f| format!("- {f}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let actions = verdict
            .required_actions
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Your previous answer needs revision.\n\nOriginal request:\n{}\n\n\
             Previous answer:\n{}\n\nFindings:\n{}\n\nRequired actions:\n{}\n\n\
             Produce a corrected answer.",
            self.objective, candidate, findings, actions
        );
        Ok(self
            .invoker
            .invoke(self.agent, &prompt, true, self.team_note.as_deref())
            .await?)
    }
}

/// Deterministic prefix from (conversationId|messageId, agentId, fromAgent)
/// plus a timestamp and UUID slice for uniqueness.
pub fn build_run_id(envelope: &MessageEnvelope, agent_id: &str) -> String {
    let base = envelope
        .conversation_id
        .as_deref()
        .unwrap_or(&envelope.message_id);
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{base}|{agent_id}|{}",
        envelope.from_agent.as_deref().unwrap_or("")
    ));
    let digest = hasher.finalize();
    let hash: String = digest.iter().take(5).map(|b| format!("{b:02x}")).collect();
    format!(
        "run_{hash}_{}_{}",
        now_millis(),
        &uuid::Uuid::new_v4().simple().to_string()[..6]
    )
}

/// Budget exhausted: ask the user something targeted instead of shipping
/// an unverified answer.
fn clarifying_question(route: TaskRoute, loop_result: &LoopResult) -> String {
    let finding = loop_result
        .verdict
        .findings
        .first()
        .map(|f| format!(" (last issue: {f})"))
        .unwrap_or_default();
    match route {
        TaskRoute::Browser => format!(
            "I couldn't get this web task to a verified state{finding}. \
             Which site should I open, and is there anything I need to log in?"
        ),
        TaskRoute::Tooling => format!(
            "I couldn't settle on a safe command for this{finding}. \
             Which exact command should I run?"
        ),
        TaskRoute::Memory => format!(
            "I wasn't sure what to store{finding}. \
             What exactly should I remember, in one sentence?"
        ),
        TaskRoute::Agent => format!(
            "I couldn't verify my answer confidently{finding}. \
             Could you narrow down what outcome you want?"
        ),
    }
}

/// Known subprocess failures get friendly text; everything else stays
/// generic.
fn translate_failure(e: &anyhow::Error) -> String {
    if let Some(invoke) = e.downcast_ref::<InvokeError>() {
        return match invoke {
            InvokeError::BinaryMissing(binary) => format!(
                "The model runner `{binary}` isn't installed or isn't on PATH, \
                 so I can't process messages right now."
            ),
            InvokeError::ModelUnavailable(model) => format!(
                "The configured model `{model}` isn't available to this account. \
                 Try a different model in settings."
            ),
            InvokeError::NoPriorSession => {
                "I couldn't resume the previous session, and starting fresh also failed."
                    .to_string()
            }
            InvokeError::Subprocess(detail) => {
                format!("Something went wrong while running the model: {detail}")
            }
        };
    }
    "Something went wrong while handling that message. I've logged the details.".to_string()
}
