use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::harness::loop_engine::{run_loop, LoopDriver, Verdict};
use crate::core::repository::Repository;
use crate::core::types::{RiskLevel, VerifierOutcome};

/// Scripted driver: verify() pops outcomes off a list, repeating the last
/// one when the script runs dry.
struct ScriptedDriver {
    outcomes: Mutex<Vec<VerifierOutcome>>,
    generations: Mutex<u32>,
    revisions: Mutex<u32>,
}

impl ScriptedDriver {
    fn new(outcomes: Vec<VerifierOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            generations: Mutex::new(0),
            revisions: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LoopDriver for ScriptedDriver {
    async fn generate(&self) -> Result<String> {
        *self.generations.lock().unwrap() += 1;
        Ok("candidate v1".to_string())
    }

    async fn verify(&self, _candidate: &str, _iteration: u32) -> Result<Verdict> {
        let mut outcomes = self.outcomes.lock().unwrap();
        let outcome = if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            outcomes[0]
        };
        Ok(Verdict {
            outcome,
            findings: vec!["scripted finding".to_string()],
            required_actions: Vec::new(),
            evidence: Vec::new(),
        })
    }

    async fn revise(&self, candidate: &str, _verdict: &Verdict, iteration: u32) -> Result<String> {
        *self.revisions.lock().unwrap() += 1;
        Ok(format!("{candidate} (rev {iteration})"))
    }
}

#[tokio::test]
async fn pass_on_first_verify_uses_one_iteration() {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let driver = ScriptedDriver::new(vec![VerifierOutcome::Pass]);

    let result = run_loop(&repo, "r1", RiskLevel::High, &driver).await.unwrap();
    assert!(!result.exhausted);
    assert_eq!(result.iterations, 1);
    assert_eq!(*driver.revisions.lock().unwrap(), 0);
    assert_eq!(repo.count_events("r1", "loop_completed").await.unwrap(), 1);
    assert_eq!(repo.count_events("r1", "loop_exhausted").await.unwrap(), 0);
}

#[tokio::test]
async fn minor_fix_revises_until_pass() {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let driver = ScriptedDriver::new(vec![
        VerifierOutcome::MinorFix,
        VerifierOutcome::MinorFix,
        VerifierOutcome::Pass,
    ]);

    let result = run_loop(&repo, "r1", RiskLevel::High, &driver).await.unwrap();
    assert!(!result.exhausted);
    assert_eq!(result.iterations, 3);
    assert_eq!(*driver.revisions.lock().unwrap(), 2);
    assert!(result.output.contains("rev 3"));
}

#[tokio::test]
async fn budget_bounds_iterations_for_every_risk_level() {
    for (risk, budget) in [
        (RiskLevel::Low, 1),
        (RiskLevel::Medium, 3),
        (RiskLevel::High, 5),
        (RiskLevel::Critical, 5),
    ] {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        // Never passes; the loop must stop at the budget.
        let driver = ScriptedDriver::new(vec![VerifierOutcome::CriticalFail]);

        let result = run_loop(&repo, "r1", risk, &driver).await.unwrap();
        assert!(result.exhausted, "risk {risk:?} should exhaust");
        assert_eq!(result.iterations, budget, "risk {risk:?}");
        assert_eq!(repo.count_events("r1", "loop_exhausted").await.unwrap(), 1);
        assert_eq!(repo.count_events("r1", "loop_completed").await.unwrap(), 0);
    }
}

#[tokio::test]
async fn abstain_completes_without_revision() {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let driver = ScriptedDriver::new(vec![VerifierOutcome::Abstain]);

    let result = run_loop(&repo, "r1", RiskLevel::Medium, &driver).await.unwrap();
    assert!(!result.exhausted);
    assert_eq!(result.verdict.outcome, VerifierOutcome::Abstain);
}

#[tokio::test]
async fn steps_are_recorded_per_phase() {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let driver = ScriptedDriver::new(vec![VerifierOutcome::MinorFix, VerifierOutcome::Pass]);

    run_loop(&repo, "r1", RiskLevel::Medium, &driver).await.unwrap();
    let steps = repo.list_steps("r1").await.unwrap();
    let phases: Vec<&str> = steps.iter().map(|s| s.phase.as_str()).collect();
    assert_eq!(phases, vec!["generate", "verify", "revise", "verify"]);
}
