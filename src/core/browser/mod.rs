mod broker;
mod cdp;
mod driver;
mod plan;
mod replay;
mod session;

pub use driver::{BrowserDriver, PageState};
pub use plan::{normalize_selector, PlanStep, Planner};
pub use replay::replay_run;
pub use session::{prepare_profile_mirror, SessionHandle};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::paths::StatePaths;
use crate::core::repository::{
    BrowserAction, BrowserApproval, BrowserTab, Repository,
};
use crate::core::settings::BrowserSettings;
use crate::core::types::{now_millis, ExecOutcome};

const STEP_RETRIES: u32 = 3;
const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(350);
const WAIT_FOR_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ARTIFACTS: usize = 6;
const MAX_EXTRACTED_LINES: usize = 5;

/// One replayable entry of a tab's selector trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub action_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: String,
    pub ts: i64,
}

/// Browser route executor: plan, drive, audit, and bail to the human on
/// payment steps and checkpoints.
pub struct BrowserExecutor {
    repo: Arc<Repository>,
    paths: StatePaths,
    settings: BrowserSettings,
    planner: Planner,
    payment_re: Regex,
    checkpoint_re: Regex,
}

impl BrowserExecutor {
    pub fn new(repo: Arc<Repository>, paths: StatePaths, settings: BrowserSettings) -> Self {
        Self {
            repo,
            paths,
            settings,
            planner: Planner::new(),
            payment_re: Regex::new(r"(?i)pay|checkout|purchase|wallet|transfer|card|cvv").unwrap(),
            checkpoint_re: Regex::new(
                r"(?i)captcha|verify you are human|are you a robot|two-factor|2fa|one-time code|verification code|session (?:has )?expired|sign in again|login expired",
            )
            .unwrap(),
        }
    }

    pub async fn execute(
        &self,
        run_id: &str,
        user_id: &str,
        objective: &str,
        candidate: &str,
    ) -> Result<ExecOutcome> {
        if !self.settings.enabled {
            return Ok(ExecOutcome::needs_input(
                "Browser automation is disabled in settings.",
            ));
        }
        let plan = self.planner.parse(objective, candidate);
        if plan.is_empty() {
            return Ok(ExecOutcome::needs_input(
                "I couldn't derive any browser steps from that. \
                 What page should I open, and what should I do there?",
            ));
        }
        self.run_plan(run_id, user_id, &plan).await
    }

    /// Execute a prepared plan (also the replay entry point).
    pub async fn run_plan(
        &self,
        run_id: &str,
        user_id: &str,
        plan: &[PlanStep],
    ) -> Result<ExecOutcome> {
        let session = match session::connect(&self.settings, &self.repo, &self.paths).await {
            Ok(session) => session,
            Err(e) => {
                return Ok(ExecOutcome::failed(format!(
                    "I couldn't reach a browser session: {e:#}"
                )));
            }
        };

        let tab_id = format!("tab_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        self.repo
            .create_browser_tab(&BrowserTab {
                tab_id: tab_id.clone(),
                session_id: session.session_id.clone(),
                run_id: run_id.to_string(),
                status: "active".to_string(),
                selector_trace: "[]".to_string(),
                created_at: 0,
                updated_at: 0,
            })
            .await?;

        let audit_dir = self.paths.browser_audit_dir(run_id, &tab_id);
        std::fs::create_dir_all(&audit_dir)?;

        let driver = session.driver;
        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut artifacts: Vec<String> = Vec::new();
        let mut extracted: Vec<String> = Vec::new();

        for (index, step) in plan.iter().enumerate() {
            let action_id = format!("act_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
            let payment = self.is_payment_step(step);

            self.repo
                .create_browser_action(&BrowserAction {
                    action_id: action_id.clone(),
                    run_id: run_id.to_string(),
                    tab_id: tab_id.clone(),
                    kind: step.kind().to_string(),
                    selector: step.selector().map(str::to_string),
                    value: step.value().map(str::to_string),
                    url: step.url().map(str::to_string),
                    risk: if payment { "critical" } else { "low" }.to_string(),
                    requires_approval: payment && self.settings.hard_stop_payments,
                    status: "pending".to_string(),
                })
                .await?;

            if payment && self.settings.hard_stop_payments {
                let approval_id = format!("bapr_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
                self.repo
                    .create_browser_approval(&BrowserApproval {
                        approval_id: approval_id.clone(),
                        run_id: run_id.to_string(),
                        action_id: action_id.clone(),
                        user_id: Some(user_id.to_string()),
                        reason: Some(format!("payment-related step: {}", step.kind())),
                        status: "pending".to_string(),
                        decided_at: None,
                        created_at: 0,
                    })
                    .await?;
                self.repo
                    .record_browser_audit(
                        run_id,
                        &tab_id,
                        Some(&action_id),
                        "approval_required",
                        None,
                        None,
                        Some(&serde_json::to_string(&trace)?),
                    )
                    .await?;
                self.save_trace(&tab_id, &trace).await?;
                let _ = driver.close().await;
                info!(
                    "Browser run {}: payment step held for approval {}",
                    run_id, approval_id
                );
                return Ok(ExecOutcome::needs_approval(
                    format!(
                        "This task reaches a payment step ({}), which I never run on my own. \
                         Approve it with `/approve {approval_id}` and I'll continue.",
                        step.kind()
                    ),
                    approval_id,
                ));
            }

            match self
                .run_step_with_retries(
                    driver.as_ref(),
                    step,
                    index,
                    &audit_dir,
                    &mut artifacts,
                )
                .await
            {
                StepOutcome::Success { extracted_text, before, after } => {
                    self.repo
                        .set_browser_action_status(&action_id, "completed")
                        .await?;
                    trace.push(self.trace_entry(&action_id, step, "success"));
                    self.repo
                        .record_browser_audit(
                            run_id,
                            &tab_id,
                            Some(&action_id),
                            "step_completed",
                            before.as_deref(),
                            after.as_deref(),
                            Some(&serde_json::to_string(trace.last().unwrap())?),
                        )
                        .await?;
                    if let Some(text) = extracted_text {
                        extracted.extend(
                            text.lines()
                                .map(str::trim)
                                .filter(|l| !l.is_empty())
                                .map(str::to_string),
                        );
                    }
                }
                StepOutcome::Checkpoint { detail, before, after } => {
                    self.repo
                        .set_browser_action_status(&action_id, "failed")
                        .await?;
                    trace.push(self.trace_entry(&action_id, step, "checkpoint"));
                    self.repo
                        .record_browser_audit(
                            run_id,
                            &tab_id,
                            Some(&action_id),
                            "human_checkpoint",
                            before.as_deref(),
                            after.as_deref(),
                            Some(&serde_json::to_string(trace.last().unwrap())?),
                        )
                        .await?;
                    self.save_trace(&tab_id, &trace).await?;
                    self.repo.set_tab_status(&tab_id, "error").await?;
                    let _ = driver.close().await;
                    return Ok(ExecOutcome::needs_input(format!(
                        "The page needs you: {detail}. \
                         Please complete it in the browser and message me to continue."
                    )));
                }
                StepOutcome::Failed { error, before } => {
                    self.repo
                        .set_browser_action_status(&action_id, "failed")
                        .await?;
                    trace.push(self.trace_entry(&action_id, step, "failed"));
                    self.repo
                        .record_browser_audit(
                            run_id,
                            &tab_id,
                            Some(&action_id),
                            "step_failed",
                            before.as_deref(),
                            None,
                            Some(&serde_json::to_string(trace.last().unwrap())?),
                        )
                        .await?;
                    self.save_trace(&tab_id, &trace).await?;
                    self.repo.set_tab_status(&tab_id, "error").await?;
                    let _ = driver.close().await;
                    return Ok(ExecOutcome::failed(format!(
                        "Browser step {} ({}) failed after {} attempts: {error}",
                        index + 1,
                        step.kind(),
                        STEP_RETRIES
                    )));
                }
            }
        }

        self.save_trace(&tab_id, &trace).await?;
        self.repo.set_tab_status(&tab_id, "released").await?;
        let _ = driver.close().await;
        self.repo
            .increment_metric("browser_runs_completed", 1.0, None)
            .await?;

        artifacts.truncate(MAX_ARTIFACTS);
        extracted.truncate(MAX_EXTRACTED_LINES);

        let mut message = format!("Browser task completed: {} step(s) executed.", plan.len());
        if !extracted.is_empty() {
            message.push_str("\n\nExtracted:\n");
            for line in &extracted {
                message.push_str(&format!("- {line}\n"));
            }
        }
        Ok(ExecOutcome {
            status: crate::core::types::ExecStatus::Completed,
            message,
            request_id: None,
            artifacts,
            extracted,
        })
    }

    async fn run_step_with_retries(
        &self,
        driver: &dyn BrowserDriver,
        step: &PlanStep,
        index: usize,
        audit_dir: &std::path::Path,
        artifacts: &mut Vec<String>,
    ) -> StepOutcome {
        let mut last_error = String::new();
        for attempt in 1..=STEP_RETRIES {
            if attempt > 1 {
                let backoff = RETRY_BASE_BACKOFF * 2u32.pow(attempt - 2);
                tokio::time::sleep(backoff).await;
            }

            let before = self
                .capture(driver, audit_dir, index, attempt, "before", artifacts)
                .await;

            match self.execute_step(driver, step).await {
                Ok(extracted_text) => {
                    let after = self
                        .capture(driver, audit_dir, index, attempt, "after", artifacts)
                        .await;

                    let state = driver.read_state().await.unwrap_or_default();
                    if let Some(detail) = self.detect_checkpoint(&state) {
                        return StepOutcome::Checkpoint {
                            detail,
                            before,
                            after,
                        };
                    }
                    return StepOutcome::Success {
                        extracted_text,
                        before,
                        after,
                    };
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    warn!(
                        "Browser step {} attempt {}/{} failed: {}",
                        index + 1,
                        attempt,
                        STEP_RETRIES,
                        last_error
                    );
                    // A checkpoint can also be the reason the step failed.
                    if let Ok(state) = driver.read_state().await {
                        if let Some(detail) = self.detect_checkpoint(&state) {
                            return StepOutcome::Checkpoint {
                                detail,
                                before,
                                after: None,
                            };
                        }
                    }
                }
            }
        }
        StepOutcome::Failed {
            error: last_error,
            before: None,
        }
    }

    async fn execute_step(
        &self,
        driver: &dyn BrowserDriver,
        step: &PlanStep,
    ) -> Result<Option<String>> {
        match step {
            PlanStep::Navigate { url } => {
                driver.navigate(url).await?;
                Ok(None)
            }
            PlanStep::Click { selector } => {
                driver.click(selector).await?;
                Ok(None)
            }
            PlanStep::Type { value, selector } | PlanStep::Fill { selector, value } => {
                driver.fill(selector, value).await?;
                Ok(None)
            }
            PlanStep::WaitFor { selector } => {
                driver.wait_for(selector, WAIT_FOR_TIMEOUT).await?;
                Ok(None)
            }
            PlanStep::Press { key } => {
                driver.press(key).await?;
                Ok(None)
            }
            PlanStep::Screenshot => Ok(None), // captured around every step anyway
            PlanStep::ExtractText { selector } => {
                Ok(Some(driver.extract_text(selector).await?))
            }
        }
    }

    async fn capture(
        &self,
        driver: &dyn BrowserDriver,
        audit_dir: &std::path::Path,
        index: usize,
        attempt: u32,
        phase: &str,
        artifacts: &mut Vec<String>,
    ) -> Option<String> {
        match driver.screenshot().await {
            Ok(png) => {
                let path = audit_dir.join(format!("step{:02}_a{}_{}.png", index + 1, attempt, phase));
                if std::fs::write(&path, png).is_ok() {
                    let path_str = path.to_string_lossy().to_string();
                    artifacts.push(path_str.clone());
                    Some(path_str)
                } else {
                    None
                }
            }
            Err(e) => {
                warn!("Screenshot failed: {:#}", e);
                None
            }
        }
    }

    fn is_payment_step(&self, step: &PlanStep) -> bool {
        let haystacks = [step.selector(), step.value(), step.url()];
        haystacks
            .iter()
            .flatten()
            .any(|text| self.payment_re.is_match(text))
    }

    fn detect_checkpoint(&self, state: &PageState) -> Option<String> {
        for haystack in [&state.url, &state.visible_text] {
            if let Some(m) = self.checkpoint_re.find(haystack) {
                return Some(format!("detected `{}` on {}", m.as_str(), state.url));
            }
        }
        None
    }

    fn trace_entry(&self, action_id: &str, step: &PlanStep, status: &str) -> TraceEntry {
        TraceEntry {
            action_id: action_id.to_string(),
            kind: step.kind().to_string(),
            selector: step.selector().map(str::to_string),
            value: step.value().map(str::to_string),
            url: step.url().map(str::to_string),
            status: status.to_string(),
            ts: now_millis(),
        }
    }

    async fn save_trace(&self, tab_id: &str, trace: &[TraceEntry]) -> Result<()> {
        self.repo
            .set_tab_trace(tab_id, &serde_json::to_string(trace)?)
            .await
    }
}

enum StepOutcome {
    Success {
        extracted_text: Option<String>,
        before: Option<String>,
        after: Option<String>,
    },
    Checkpoint {
        detail: String,
        before: Option<String>,
        after: Option<String>,
    },
    Failed {
        error: String,
        before: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> (tempfile::TempDir, BrowserExecutor) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        (
            tmp,
            BrowserExecutor::new(repo, paths, BrowserSettings::default()),
        )
    }

    #[test]
    fn payment_steps_are_flagged() {
        let (_tmp, exec) = executor();
        assert!(exec.is_payment_step(&PlanStep::Click {
            selector: "#checkout-button".to_string()
        }));
        assert!(exec.is_payment_step(&PlanStep::Fill {
            selector: "#cvv".to_string(),
            value: "123".to_string()
        }));
        assert!(exec.is_payment_step(&PlanStep::Navigate {
            url: "https://shop.example.com/payment".to_string()
        }));
        assert!(!exec.is_payment_step(&PlanStep::Click {
            selector: "#profile".to_string()
        }));
    }

    #[test]
    fn checkpoint_detection_reads_url_and_text() {
        let (_tmp, exec) = executor();
        let by_text = PageState {
            url: "https://example.com/login".to_string(),
            title: String::new(),
            visible_text: "Please verify you are human to continue".to_string(),
        };
        assert!(exec.detect_checkpoint(&by_text).is_some());

        let by_url = PageState {
            url: "https://example.com/captcha?return=/".to_string(),
            title: String::new(),
            visible_text: String::new(),
        };
        assert!(exec.detect_checkpoint(&by_url).is_some());

        let clean = PageState {
            url: "https://example.com/dashboard".to_string(),
            title: String::new(),
            visible_text: "Welcome back".to_string(),
        };
        assert!(exec.detect_checkpoint(&clean).is_none());
    }

    #[test]
    fn trace_entries_serialize_camel_case() {
        let (_tmp, exec) = executor();
        let entry = exec.trace_entry(
            "act_1",
            &PlanStep::Click {
                selector: "#go".to_string(),
            },
            "success",
        );
        let raw = serde_json::to_string(&entry).unwrap();
        assert!(raw.contains("\"actionId\":\"act_1\""));
        assert!(raw.contains("\"kind\":\"click\""));
    }
}
