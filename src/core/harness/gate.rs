use std::sync::Arc;

use anyhow::Result;

use crate::core::repository::{Permission, Repository};
use crate::core::types::{RiskLevel, TaskRoute};

/// Final admission decision before an answer leaves the system.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allow: bool,
    pub requires_approval: bool,
    pub request_id: Option<String>,
    pub reason: Option<String>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            requires_approval: false,
            request_id: None,
            reason: None,
        }
    }
}

/// Publish gate between a verified candidate and outbound delivery.
///
/// The current policy admits everything; the browser route never reaches
/// this gate because the browser executor carries its own per-action
/// approvals. `require_approval` is the wired-but-dormant path that a
/// payment/approval policy would switch on.
pub struct PublishGate {
    repo: Arc<Repository>,
}

impl PublishGate {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn evaluate(
        &self,
        _run_id: &str,
        _user_id: Option<&str>,
        _output: &str,
        route: TaskRoute,
        _risk: RiskLevel,
    ) -> Result<GateDecision> {
        if route == TaskRoute::Browser {
            // Per-action approvals happen inside the browser executor.
            return Ok(GateDecision::allow());
        }
        Ok(GateDecision::allow())
    }

    /// Insert a pending approval request and hand back its request id.
    /// Reachable so a stricter policy can flip `evaluate` onto it.
    #[allow(dead_code)]
    pub async fn require_approval(
        &self,
        run_id: &str,
        user_id: &str,
        route: TaskRoute,
        reason: &str,
    ) -> Result<GateDecision> {
        let pending = Permission::pending(
            user_id,
            &format!("publish:{}", route.as_str()),
            "approve",
            Some(run_id),
        );
        let request_id = pending.permission_id.clone();
        self.repo.create_permission(&pending).await?;
        Ok(GateDecision {
            allow: false,
            requires_approval: true,
            request_id: Some(request_id),
            reason: Some(reason.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_policy_admits_every_route() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let gate = PublishGate::new(repo);
        for route in [
            TaskRoute::Agent,
            TaskRoute::Tooling,
            TaskRoute::Browser,
            TaskRoute::Memory,
        ] {
            let decision = gate
                .evaluate("r1", Some("u"), "an answer", route, RiskLevel::Critical)
                .await
                .unwrap();
            assert!(decision.allow, "route {route:?} should pass the gate");
            assert!(!decision.requires_approval);
        }
    }

    #[tokio::test]
    async fn require_approval_inserts_a_pending_request() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let gate = PublishGate::new(repo.clone());

        let decision = gate
            .require_approval("r1", "u", TaskRoute::Tooling, "payment detected")
            .await
            .unwrap();
        assert!(!decision.allow);
        assert!(decision.requires_approval);
        let request_id = decision.request_id.unwrap();

        let pending = repo
            .find_pending_permission("u", "publish:tooling", "approve")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.permission_id, request_id);
        assert_eq!(pending.resource.as_deref(), Some("r1"));
    }
}
