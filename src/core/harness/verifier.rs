use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use super::loop_engine::Verdict;
use crate::core::invoker::AgentInvoker;
use crate::core::settings::AgentConfig;
use crate::core::types::VerifierOutcome;

const VERIFIER_PROMPT: &str = "You are a strict verifier for an assistant's answer. \
Evaluate whether the answer below actually accomplishes the objective. \
Reply with JSON only: {\"outcome\": \"pass\" | \"minor_fix\" | \"critical_fail\" | \"abstain\", \
\"findings\": [\"...\"], \"required_actions\": [\"...\"]}. \
Use minor_fix for fixable gaps, critical_fail for wrong or fabricated answers, \
abstain when you cannot judge.";

/// LLM-driven verifier with deterministic fast paths.
///
/// Fail-open policy: a verifier outage or unparsable reply must never block
/// a user-facing response, so both default to `pass`. A strict deployment
/// would flip this to fail-closed for high-risk runs.
pub struct Verifier {
    invoker: Arc<AgentInvoker>,
    url_re: Regex,
    evidence_re: Regex,
    placeholder_re: Regex,
}

impl Verifier {
    pub fn new(invoker: Arc<AgentInvoker>) -> Self {
        Self {
            invoker,
            url_re: Regex::new(r"https?://[^\s\])>\x22']+").unwrap(),
            evidence_re: Regex::new(r"(?s)\[evidence:\s*(.*?)\]").unwrap(),
            placeholder_re: Regex::new(
                r"(?i)^(error[:\s]|\[error)|something went wrong|an error occurred|request failed",
            )
            .unwrap(),
        }
    }

    pub async fn verify(
        &self,
        agent: &AgentConfig,
        objective: &str,
        candidate: &str,
        iteration: u32,
    ) -> Verdict {
        if let Some(verdict) = self.fast_path(candidate) {
            return verdict;
        }

        let prompt = format!(
            "{VERIFIER_PROMPT}\n\nObjective:\n{objective}\n\nAnswer (iteration {iteration}):\n{candidate}"
        );

        match self.invoker.invoke(agent, &prompt, false, None).await {
            Ok(response) => self.parse_verdict(&response, candidate),
            Err(e) => {
                warn!("Verifier call failed ({}); failing open to pass", e);
                let mut verdict = Verdict::pass();
                verdict.evidence = self.extract_evidence(candidate);
                verdict
            }
        }
    }

    /// Deterministic rejects that never need a model call.
    fn fast_path(&self, candidate: &str) -> Option<Verdict> {
        let trimmed = candidate.trim();
        if trimmed.len() < 8 {
            return Some(Verdict {
                outcome: VerifierOutcome::CriticalFail,
                findings: vec!["candidate is empty or too short to be an answer".to_string()],
                required_actions: vec!["produce a substantive answer".to_string()],
                evidence: Vec::new(),
            });
        }
        if self.placeholder_re.is_match(trimmed) {
            return Some(Verdict {
                outcome: VerifierOutcome::CriticalFail,
                findings: vec!["candidate is a placeholder error message".to_string()],
                required_actions: vec!["retry the task instead of echoing the error".to_string()],
                evidence: Vec::new(),
            });
        }
        None
    }

    /// Tolerant parse of the verifier's reply; unparsable means `pass`.
    fn parse_verdict(&self, response: &str, candidate: &str) -> Verdict {
        let evidence = self.extract_evidence(candidate);

        let Some(json) = first_json_object(response) else {
            return Verdict {
                outcome: VerifierOutcome::Pass,
                findings: Vec::new(),
                required_actions: Vec::new(),
                evidence,
            };
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&json) else {
            return Verdict {
                outcome: VerifierOutcome::Pass,
                findings: Vec::new(),
                required_actions: Vec::new(),
                evidence,
            };
        };

        let outcome = value
            .get("outcome")
            .and_then(|o| o.as_str())
            .and_then(VerifierOutcome::from_status)
            .unwrap_or(VerifierOutcome::Pass);

        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        Verdict {
            outcome,
            findings: strings("findings"),
            required_actions: strings("required_actions"),
            evidence,
        }
    }

    /// URLs and `[evidence: …]` tokens cited by the candidate.
    pub fn extract_evidence(&self, candidate: &str) -> Vec<String> {
        let mut refs: Vec<String> = self
            .url_re
            .find_iter(candidate)
            .map(|m| m.as_str().to_string())
            .collect();
        for caps in self.evidence_re.captures_iter(candidate) {
            let token = caps.get(1).unwrap().as_str().trim().to_string();
            if !token.is_empty() {
                refs.push(token);
            }
        }
        refs.dedup();
        refs
    }
}

/// First balanced `{ ... }` block in a possibly chatty reply.
pub(crate) fn first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
