/// One parsed frame from a framed-JSON model runner's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    AgentMessage(String),
    Error(String),
    Unknown,
}

/// Parse a single stdout line. Frames carry their type under `msg.type`
/// (current) or a top-level `type` (legacy); anything malformed is
/// tolerated as `Unknown` and skipped by the caller.
pub fn parse_frame(line: &str) -> RunnerEvent {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return RunnerEvent::Unknown;
    };

    let (kind, body) = match value.get("msg") {
        Some(msg) => (
            msg.get("type").and_then(|t| t.as_str()).unwrap_or(""),
            msg,
        ),
        None => (
            value.get("type").and_then(|t| t.as_str()).unwrap_or(""),
            &value,
        ),
    };

    match kind {
        "agent_message" => {
            let text = body
                .get("text")
                .or_else(|| body.get("message"))
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            RunnerEvent::AgentMessage(text.to_string())
        }
        "error" => {
            let text = body
                .get("message")
                .or_else(|| body.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("unknown runner error");
            RunnerEvent::Error(text.to_string())
        }
        _ => RunnerEvent::Unknown,
    }
}

/// Rolling fold over a frame stream: the last agent message wins, and a
/// trailing error overrides any text seen before it.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    last_message: Option<String>,
    error: Option<String>,
}

impl FrameAccumulator {
    pub fn push(&mut self, line: &str) {
        match parse_frame(line) {
            RunnerEvent::AgentMessage(text) => {
                self.last_message = Some(text);
                self.error = None;
            }
            RunnerEvent::Error(text) => self.error = Some(text),
            RunnerEvent::Unknown => {}
        }
    }

    pub fn finish(self) -> Result<String, String> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.last_message.ok_or_else(|| "runner produced no agent message".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_and_legacy_frames() {
        assert_eq!(
            parse_frame(r#"{"msg":{"type":"agent_message","text":"hi"}}"#),
            RunnerEvent::AgentMessage("hi".to_string())
        );
        assert_eq!(
            parse_frame(r#"{"type":"agent_message","text":"legacy"}"#),
            RunnerEvent::AgentMessage("legacy".to_string())
        );
        assert_eq!(
            parse_frame(r#"{"msg":{"type":"error","message":"boom"}}"#),
            RunnerEvent::Error("boom".to_string())
        );
    }

    #[test]
    fn malformed_lines_are_unknown() {
        assert_eq!(parse_frame("not json at all"), RunnerEvent::Unknown);
        assert_eq!(parse_frame(r#"{"msg":{"type":"task_started"}}"#), RunnerEvent::Unknown);
        assert_eq!(parse_frame(""), RunnerEvent::Unknown);
    }

    #[test]
    fn last_agent_message_wins() {
        let mut acc = FrameAccumulator::default();
        acc.push(r#"{"msg":{"type":"agent_message","text":"first"}}"#);
        acc.push("garbage line");
        acc.push(r#"{"msg":{"type":"agent_message","text":"second"}}"#);
        assert_eq!(acc.finish().unwrap(), "second");
    }

    #[test]
    fn trailing_error_fails_the_run() {
        let mut acc = FrameAccumulator::default();
        acc.push(r#"{"msg":{"type":"agent_message","text":"almost"}}"#);
        acc.push(r#"{"msg":{"type":"error","message":"session crashed"}}"#);
        assert_eq!(acc.finish().unwrap_err(), "session crashed");
    }
}
