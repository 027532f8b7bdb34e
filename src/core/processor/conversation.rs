use std::collections::HashMap;

use crate::core::queue::MessageEnvelope;
use crate::core::settings::TeamConfig;
use crate::core::types::now_millis;

pub const MAX_CONVERSATION_MESSAGES: u32 = 50;

/// One branch's finished response inside a conversation.
#[derive(Debug, Clone)]
pub struct BranchResponse {
    pub agent_id: String,
    pub run_id: Option<String>,
    pub text: String,
}

/// Live aggregation state for one originating user message across all of
/// its team branches. In-memory only: a restart loses open conversations,
/// and supersession by the next inbound message covers the gap.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub conversation_id: String,
    pub team: TeamConfig,
    pub origin: MessageEnvelope,
    pub responses: Vec<BranchResponse>,
    pub attachments: Vec<String>,
    /// Open branches. The conversation closes exactly when this hits zero.
    pub pending: u32,
    pub total_messages: u32,
    pub max_messages: u32,
    pub started_at: i64,
    /// Outgoing teammate mentions per agent, for the transcript.
    pub mention_counts: HashMap<String, u32>,
}

impl Conversation {
    pub fn new(conversation_id: String, team: TeamConfig, origin: MessageEnvelope) -> Self {
        Self {
            conversation_id,
            team,
            origin,
            responses: Vec::new(),
            attachments: Vec::new(),
            pending: 1,
            total_messages: 1,
            max_messages: MAX_CONVERSATION_MESSAGES,
            started_at: now_millis(),
            mention_counts: HashMap::new(),
        }
    }

    pub fn at_capacity(&self) -> bool {
        self.total_messages >= self.max_messages
    }

    pub fn record_response(&mut self, agent_id: &str, run_id: Option<String>, text: String) {
        self.responses.push(BranchResponse {
            agent_id: agent_id.to_string(),
            run_id,
            text,
        });
    }

    pub fn record_mention(&mut self, agent_id: &str) {
        *self.mention_counts.entry(agent_id.to_string()).or_insert(0) += 1;
        self.total_messages += 1;
        self.pending += 1;
    }

    /// Close one branch. Returns true when the conversation has settled.
    pub fn branch_done(&mut self) -> bool {
        self.pending = self.pending.saturating_sub(1);
        self.pending == 0
    }

    /// Final outgoing text: a single branch answers raw; multiple branches
    /// are labeled and separated.
    pub fn aggregate(&self) -> String {
        match self.responses.len() {
            0 => String::new(),
            1 => self.responses[0].text.clone(),
            _ => self
                .responses
                .iter()
                .map(|r| format!("@{}: {}", r.agent_id, r.text))
                .collect::<Vec<_>>()
                .join("\n------\n"),
        }
    }

    /// Markdown chat log saved under the team's chat directory.
    pub fn transcript(&self) -> String {
        let mut out = format!(
            "# Conversation {}\n\nTeam: {}\nFrom: {} ({})\nStarted: {}\n\n## Request\n\n{}\n",
            self.conversation_id,
            self.team.id,
            self.origin.sender,
            self.origin.channel,
            chrono::DateTime::from_timestamp_millis(self.started_at)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            self.origin.message,
        );
        for response in &self.responses {
            out.push_str(&format!(
                "\n## @{}\n\n{}\n",
                response.agent_id, response.text
            ));
        }
        if !self.attachments.is_empty() {
            out.push_str("\n## Attachments\n\n");
            for path in &self.attachments {
                out.push_str(&format!("- {path}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        let team = TeamConfig {
            id: "research".to_string(),
            name: None,
            leader: "alpha".to_string(),
            members: vec!["beta".to_string()],
        };
        let origin = MessageEnvelope {
            channel: "whatsapp".to_string(),
            sender: "Toni".to_string(),
            message: "plan the launch".to_string(),
            timestamp: now_millis(),
            message_id: "m1".to_string(),
            sender_id: Some("u".to_string()),
            agent: None,
            files: Vec::new(),
            conversation_id: None,
            from_agent: None,
            original_message: None,
        };
        Conversation::new("conv1".to_string(), team, origin)
    }

    #[test]
    fn closes_exactly_when_pending_hits_zero() {
        let mut conv = conversation();
        conv.record_mention("beta");
        assert_eq!(conv.pending, 2);

        conv.record_response("alpha", None, "leader done".to_string());
        assert!(!conv.branch_done());
        conv.record_response("beta", None, "teammate done".to_string());
        assert!(conv.branch_done());
    }

    #[test]
    fn single_branch_aggregates_raw() {
        let mut conv = conversation();
        conv.record_response("alpha", None, "just me".to_string());
        assert_eq!(conv.aggregate(), "just me");
    }

    #[test]
    fn multiple_branches_are_labeled_and_separated() {
        let mut conv = conversation();
        conv.record_response("alpha", None, "one".to_string());
        conv.record_response("beta", None, "two".to_string());
        let text = conv.aggregate();
        assert!(text.starts_with("@alpha: one"));
        assert!(text.contains("\n------\n"));
        assert!(text.contains("@beta: two"));
    }

    #[test]
    fn capacity_blocks_after_fifty_messages() {
        let mut conv = conversation();
        for _ in 0..49 {
            conv.record_mention("beta");
        }
        assert!(conv.at_capacity());
    }

    #[test]
    fn transcript_contains_request_and_branches() {
        let mut conv = conversation();
        conv.record_response("alpha", None, "the plan".to_string());
        conv.attachments.push("/tmp/x.png".to_string());
        let transcript = conv.transcript();
        assert!(transcript.contains("plan the launch"));
        assert!(transcript.contains("## @alpha"));
        assert!(transcript.contains("/tmp/x.png"));
    }
}
