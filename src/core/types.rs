use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    /// Loop budget for this risk level: how many verify passes a run gets.
    pub fn loop_budget(self) -> u32 {
        match self {
            RiskLevel::Low => 1,
            RiskLevel::Medium => 3,
            RiskLevel::High | RiskLevel::Critical => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRoute {
    Agent,
    Tooling,
    Browser,
    Memory,
}

impl TaskRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskRoute::Agent => "agent",
            TaskRoute::Tooling => "tooling",
            TaskRoute::Browser => "browser",
            TaskRoute::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    NeedsInput,
    NeedsRevision,
    Verified,
    Rejected,
    AwaitingApproval,
    Sent,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::NeedsInput => "needs_input",
            RunStatus::NeedsRevision => "needs_revision",
            RunStatus::Verified => "verified",
            RunStatus::Rejected => "rejected",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Sent => "sent",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "in_progress" => Some(RunStatus::InProgress),
            "needs_input" => Some(RunStatus::NeedsInput),
            "needs_revision" => Some(RunStatus::NeedsRevision),
            "verified" => Some(RunStatus::Verified),
            "rejected" => Some(RunStatus::Rejected),
            "awaiting_approval" => Some(RunStatus::AwaitingApproval),
            "sent" => Some(RunStatus::Sent),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierOutcome {
    Pass,
    MinorFix,
    CriticalFail,
    Abstain,
}

impl VerifierOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            VerifierOutcome::Pass => "pass",
            VerifierOutcome::MinorFix => "minor_fix",
            VerifierOutcome::CriticalFail => "critical_fail",
            VerifierOutcome::Abstain => "abstain",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(VerifierOutcome::Pass),
            "minor_fix" => Some(VerifierOutcome::MinorFix),
            "critical_fail" => Some(VerifierOutcome::CriticalFail),
            "abstain" => Some(VerifierOutcome::Abstain),
            _ => None,
        }
    }
}

/// Outcome of a route-specific executor (tooling / browser / memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Completed,
    NeedsApproval,
    NeedsInput,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub message: String,
    pub request_id: Option<String>,
    /// Screenshot / file paths produced while executing (browser route).
    pub artifacts: Vec<String>,
    /// Lines extracted from the page (browser route).
    pub extracted: Vec<String>,
}

impl ExecOutcome {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Completed,
            message: message.into(),
            request_id: None,
            artifacts: Vec::new(),
            extracted: Vec::new(),
        }
    }

    pub fn needs_input(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::NeedsInput,
            message: message.into(),
            request_id: None,
            artifacts: Vec::new(),
            extracted: Vec::new(),
        }
    }

    pub fn needs_approval(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::NeedsApproval,
            message: message.into(),
            request_id: Some(request_id.into()),
            artifacts: Vec::new(),
            extracted: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Failed,
            message: message.into(),
            request_id: None,
            artifacts: Vec::new(),
            extracted: Vec::new(),
        }
    }
}

/// Coarse intent of an inbound message, used for ack and reply shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIntent {
    Question,
    BrowserTask,
    EngineeringTask,
    GeneralTask,
}

impl MessageIntent {
    pub fn is_task(self) -> bool {
        !matches!(self, MessageIntent::Question)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
