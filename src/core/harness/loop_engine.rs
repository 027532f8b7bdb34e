use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::repository::Repository;
use crate::core::types::{RiskLevel, VerifierOutcome};

/// Structured verdict returned by the verifier.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: VerifierOutcome,
    pub findings: Vec<String>,
    pub required_actions: Vec<String>,
    pub evidence: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            outcome: VerifierOutcome::Pass,
            findings: Vec::new(),
            required_actions: Vec::new(),
            evidence: Vec::new(),
        }
    }
}

/// The three callbacks the loop drives. The orchestrator wires these to
/// the model runner and the verifier.
#[async_trait]
pub trait LoopDriver: Send + Sync {
    async fn generate(&self) -> Result<String>;
    async fn verify(&self, candidate: &str, iteration: u32) -> Result<Verdict>;
    async fn revise(&self, candidate: &str, verdict: &Verdict, iteration: u32) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct LoopResult {
    pub output: String,
    pub verdict: Verdict,
    pub iterations: u32,
    pub exhausted: bool,
}

/// Generator -> verifier -> reviser iteration under a risk-scaled budget.
///
/// Records a step row per phase and exactly one `loop_completed` or
/// `loop_exhausted` event.
pub async fn run_loop(
    repo: &Arc<Repository>,
    run_id: &str,
    risk: RiskLevel,
    driver: &dyn LoopDriver,
) -> Result<LoopResult> {
    let budget = risk.loop_budget();

    let mut candidate = driver.generate().await?;
    repo.record_step(run_id, 1, "generate", &candidate).await?;

    let mut iteration: u32 = 1;
    let mut verdict = driver.verify(&candidate, iteration).await?;
    repo.record_step(run_id, iteration, "verify", verdict.outcome.as_str())
        .await?;
    repo.update_run_loop(run_id, iteration, verdict.outcome).await?;

    loop {
        match verdict.outcome {
            VerifierOutcome::Pass | VerifierOutcome::Abstain => {
                repo.record_event(
                    run_id,
                    "loop_completed",
                    &serde_json::json!({
                        "iterations": iteration,
                        "budget": budget,
                        "outcome": verdict.outcome.as_str(),
                    }),
                )
                .await?;
                return Ok(LoopResult {
                    output: candidate,
                    verdict,
                    iterations: iteration,
                    exhausted: false,
                });
            }
            VerifierOutcome::MinorFix | VerifierOutcome::CriticalFail if iteration < budget => {
                iteration += 1;
                candidate = driver.revise(&candidate, &verdict, iteration).await?;
                repo.record_step(run_id, iteration, "revise", &candidate).await?;

                verdict = driver.verify(&candidate, iteration).await?;
                repo.record_step(run_id, iteration, "verify", verdict.outcome.as_str())
                    .await?;
                repo.update_run_loop(run_id, iteration, verdict.outcome).await?;
            }
            _ => {
                repo.record_event(
                    run_id,
                    "loop_exhausted",
                    &serde_json::json!({
                        "iterations": iteration,
                        "budget": budget,
                        "outcome": verdict.outcome.as_str(),
                    }),
                )
                .await?;
                return Ok(LoopResult {
                    output: candidate,
                    verdict,
                    iterations: iteration,
                    exhausted: true,
                });
            }
        }
    }
}
