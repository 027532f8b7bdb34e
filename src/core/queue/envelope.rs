use serde::{Deserialize, Serialize};

/// One queue file. Adapters write these into `incoming/`; the processor
/// writes them into `outgoing/` for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub channel: String,
    pub sender: String,
    pub message: String,
    pub timestamp: i64,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Pre-routed agent id set by the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Absolute attachment paths under the state home `files/` tree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Set on internal agent-to-agent messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_agent: Option<String>,
    /// Outgoing only: the inbound text this envelope answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
}

impl MessageEnvelope {
    pub fn is_internal(&self) -> bool {
        self.conversation_id.is_some()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.channel == "heartbeat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_camel_case() {
        let env = MessageEnvelope {
            channel: "whatsapp".to_string(),
            sender: "Toni".to_string(),
            message: "hello".to_string(),
            timestamp: 1700000000000,
            message_id: "m1".to_string(),
            sender_id: Some("123".to_string()),
            agent: None,
            files: vec![],
            conversation_id: None,
            from_agent: None,
            original_message: None,
        };
        let raw = serde_json::to_string(&env).unwrap();
        assert!(raw.contains("\"messageId\":\"m1\""));
        assert!(raw.contains("\"senderId\":\"123\""));
        assert!(!raw.contains("conversationId"));

        let parsed: MessageEnvelope = serde_json::from_str(
            r#"{"channel":"telegram","sender":"t","message":"hi","timestamp":1,
                "messageId":"x","conversationId":"c1","fromAgent":"alpha"}"#,
        )
        .unwrap();
        assert!(parsed.is_internal());
        assert_eq!(parsed.from_agent.as_deref(), Some("alpha"));
    }
}
