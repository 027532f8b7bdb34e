use regex::Regex;

use crate::core::types::{RiskLevel, TaskRoute};

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: TaskRoute,
    pub reasons: Vec<String>,
}

struct RiskRule {
    pattern: Regex,
    level: RiskLevel,
    label: &'static str,
}

pub struct Classifier {
    risk_rules: Vec<RiskRule>,
    browser_re: Regex,
    tooling_re: Regex,
    memory_re: Regex,
}

impl Classifier {
    pub fn new() -> Self {
        let rule = |pattern: &str, level: RiskLevel, label: &'static str| RiskRule {
            pattern: Regex::new(pattern).unwrap(),
            level,
            label,
        };
        Self {
            // Ordered table; the maximum matched level wins.
            risk_rules: vec![
                rule(
                    r"(?i)\b(pay|payment|purchase|buy|checkout|transfer|wire|card number|cvv|wallet)\b",
                    RiskLevel::Critical,
                    "payment or money movement",
                ),
                rule(
                    r"(?i)\b(delete|drop|wipe|erase|destroy|rm -rf|force push)\b",
                    RiskLevel::Critical,
                    "destructive operation",
                ),
                rule(
                    r"(?i)\b(password|credential|secret|token|api key|2fa|login|sign in|ssh)\b",
                    RiskLevel::High,
                    "credentials or authentication",
                ),
                rule(
                    r"(?i)\b(deploy|production|prod|release|publish|send email|send the email)\b",
                    RiskLevel::High,
                    "outward-facing change",
                ),
                rule(
                    r"(?i)\b(install|uninstall|upgrade|configure|modify|update|migrate)\b",
                    RiskLevel::Medium,
                    "system modification",
                ),
                rule(
                    r"(?i)\b(book|schedule|order|submit|post|register|sign up)\b",
                    RiskLevel::Medium,
                    "commits on the user's behalf",
                ),
            ],
            browser_re: Regex::new(
                r"(?i)\b(browser|chrome|chromium|navigate|website|web page|webpage|login|log in|portal|dashboard|url|https?://)\b",
            )
            .unwrap(),
            tooling_re: Regex::new(
                r"(?i)\b(install|npm|npx|pip3?|brew|git|docker|pnpm|yarn|package|tool|command line|cli)\b",
            )
            .unwrap(),
            memory_re: Regex::new(
                r"(?i)\b(remember|memoriz|preference|prefer|forget|recall|note that)\b",
            )
            .unwrap(),
        }
    }

    /// Maximum matched risk wins; no match means `low`.
    pub fn classify_risk(&self, objective: &str) -> RiskDecision {
        let mut level = RiskLevel::Low;
        let mut reasons = Vec::new();
        for rule in &self.risk_rules {
            if rule.pattern.is_match(objective) {
                reasons.push(rule.label.to_string());
                if rule.level > level {
                    level = rule.level;
                }
            }
        }
        if reasons.is_empty() {
            reasons.push("no risk keywords matched".to_string());
        }
        RiskDecision { level, reasons }
    }

    /// Route precedence: browser > tooling > memory > agent.
    pub fn determine_route(&self, objective: &str) -> RouteDecision {
        if self.browser_re.is_match(objective) {
            return RouteDecision {
                route: TaskRoute::Browser,
                reasons: vec!["browser keywords matched".to_string()],
            };
        }
        if self.tooling_re.is_match(objective) {
            return RouteDecision {
                route: TaskRoute::Tooling,
                reasons: vec!["tooling keywords matched".to_string()],
            };
        }
        if self.memory_re.is_match(objective) {
            return RouteDecision {
                route: TaskRoute::Memory,
                reasons: vec!["memory keywords matched".to_string()],
            };
        }
        RouteDecision {
            route: TaskRoute::Agent,
            reasons: vec!["default: plain agent response".to_string()],
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}
