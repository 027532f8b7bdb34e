use regex::Regex;
use serde::{Deserialize, Serialize};

/// One typed step of a browser plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Navigate { url: String },
    Click { selector: String },
    Type { value: String, selector: String },
    Fill { selector: String, value: String },
    WaitFor { selector: String },
    Press { key: String },
    Screenshot,
    ExtractText { selector: String },
}

impl PlanStep {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanStep::Navigate { .. } => "navigate",
            PlanStep::Click { .. } => "click",
            PlanStep::Type { .. } => "type",
            PlanStep::Fill { .. } => "fill",
            PlanStep::WaitFor { .. } => "wait_for",
            PlanStep::Press { .. } => "press",
            PlanStep::Screenshot => "screenshot",
            PlanStep::ExtractText { .. } => "extract_text",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            PlanStep::Click { selector }
            | PlanStep::Type { selector, .. }
            | PlanStep::Fill { selector, .. }
            | PlanStep::WaitFor { selector }
            | PlanStep::ExtractText { selector } => Some(selector),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            PlanStep::Type { value, .. } | PlanStep::Fill { value, .. } => Some(value),
            PlanStep::Press { key } => Some(key),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            PlanStep::Navigate { url } => Some(url),
            _ => None,
        }
    }
}

pub struct Planner {
    navigate_re: Regex,
    click_re: Regex,
    type_re: Regex,
    fill_re: Regex,
    wait_re: Regex,
    press_re: Regex,
    extract_re: Regex,
    screenshot_re: Regex,
    url_re: Regex,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            navigate_re: Regex::new(r"(?i)\b(?:navigate to|go to|open|visit)\s+(\S+)").unwrap(),
            click_re: Regex::new(r"(?i)\bclick(?: on)?\s+(?:the\s+)?(.+)").unwrap(),
            type_re: Regex::new(r#"(?i)\btype\s+"([^"]+)"(?:\s+(?:into|in)\s+(?:the\s+)?(.+))?"#)
                .unwrap(),
            fill_re: Regex::new(r#"(?i)\bfill\s+(\S+)\s+with\s+"?([^"\n]+)"?"#).unwrap(),
            wait_re: Regex::new(r"(?i)\bwait for\s+(?:the\s+)?(.+)").unwrap(),
            press_re: Regex::new(r"(?i)\bpress\s+([A-Za-z0-9]+)").unwrap(),
            extract_re: Regex::new(r"(?i)\bextract(?: the)? text(?: from)?\s+(?:the\s+)?(.+)")
                .unwrap(),
            screenshot_re: Regex::new(r"(?i)\bscreenshot\b").unwrap(),
            url_re: Regex::new(r"https?://[^\s\])>\x22']+").unwrap(),
        }
    }

    /// Parse objective + candidate output into typed steps. When nothing
    /// parses but a URL is present, the plan degrades to look-and-report:
    /// `[navigate, screenshot]`.
    pub fn parse(&self, objective: &str, candidate: &str) -> Vec<PlanStep> {
        let mut steps = Vec::new();
        for source in [candidate, objective] {
            for line in source.lines() {
                self.parse_line(line, &mut steps);
            }
            if !steps.is_empty() {
                break;
            }
        }

        if steps.is_empty() {
            let combined = format!("{objective}\n{candidate}");
            if let Some(url) = self.url_re.find(&combined) {
                steps.push(PlanStep::Navigate {
                    url: url.as_str().to_string(),
                });
                steps.push(PlanStep::Screenshot);
            }
        }
        steps
    }

    fn parse_line(&self, line: &str, steps: &mut Vec<PlanStep>) {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let line = strip_number_prefix(line);
        if line.is_empty() {
            return;
        }

        if let Some(caps) = self.navigate_re.captures(line) {
            let raw = caps.get(1).unwrap().as_str().trim_end_matches([',', ';']);
            if raw.contains('.') || raw.starts_with("http") {
                let url = if raw.starts_with("http") {
                    raw.to_string()
                } else {
                    format!("https://{raw}")
                };
                steps.push(PlanStep::Navigate { url });
                return;
            }
        }
        if let Some(caps) = self.fill_re.captures(line) {
            steps.push(PlanStep::Fill {
                selector: normalize_selector(caps.get(1).unwrap().as_str()),
                value: caps
                    .get(2)
                    .unwrap()
                    .as_str()
                    .trim()
                    .trim_end_matches('.')
                    .to_string(),
            });
            return;
        }
        if let Some(caps) = self.type_re.captures(line) {
            let value = caps.get(1).unwrap().as_str().to_string();
            let selector = caps
                .get(2)
                .map(|m| normalize_selector(m.as_str()))
                .unwrap_or_else(|| "input".to_string());
            steps.push(PlanStep::Type { value, selector });
            return;
        }
        if let Some(caps) = self.wait_re.captures(line) {
            steps.push(PlanStep::WaitFor {
                selector: normalize_selector(caps.get(1).unwrap().as_str()),
            });
            return;
        }
        if let Some(caps) = self.extract_re.captures(line) {
            steps.push(PlanStep::ExtractText {
                selector: normalize_selector(caps.get(1).unwrap().as_str()),
            });
            return;
        }
        if let Some(caps) = self.click_re.captures(line) {
            steps.push(PlanStep::Click {
                selector: normalize_selector(caps.get(1).unwrap().as_str()),
            });
            return;
        }
        if let Some(caps) = self.press_re.captures(line) {
            steps.push(PlanStep::Press {
                key: caps.get(1).unwrap().as_str().to_string(),
            });
            return;
        }
        if self.screenshot_re.is_match(line) {
            steps.push(PlanStep::Screenshot);
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_number_prefix(line: &str) -> &str {
    if let Some(dot) = line.find(". ") {
        if dot <= 2 && line[..dot].chars().all(|c| c.is_ascii_digit()) {
            return line[dot + 2..].trim();
        }
    }
    line
}

/// Selector normalization:
/// - leading `#` / `.` / `[` stays CSS
/// - `text=` / `css=` / `xpath=` prefixes are kept verbatim
/// - multi-word untagged values become `text=<value>`
/// - single identifiers pass through
pub fn normalize_selector(raw: &str) -> String {
    let s = raw.trim().trim_matches('"').trim_matches('\'').trim();
    let s = s.trim_end_matches(['.', ',', ';']);
    if s.starts_with('#') || s.starts_with('.') || s.starts_with('[') {
        return s.to_string();
    }
    if s.starts_with("text=") || s.starts_with("css=") || s.starts_with("xpath=") {
        return s.to_string();
    }
    if s.split_whitespace().count() > 1 {
        return format!("text={s}");
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_step_list() {
        let planner = Planner::new();
        let candidate = "\
1. Go to https://app.example.com/login\n\
2. Fill #email with user@example.com\n\
3. Type \"hunter2\" into #password\n\
4. Click the Sign in button\n\
5. Wait for .dashboard\n\
6. Take a screenshot\n";
        let steps = planner.parse("log in to the portal", candidate);
        assert_eq!(
            steps[0],
            PlanStep::Navigate {
                url: "https://app.example.com/login".to_string()
            }
        );
        assert_eq!(
            steps[1],
            PlanStep::Fill {
                selector: "#email".to_string(),
                value: "user@example.com".to_string()
            }
        );
        assert_eq!(
            steps[2],
            PlanStep::Type {
                value: "hunter2".to_string(),
                selector: "#password".to_string()
            }
        );
        assert_eq!(
            steps[3],
            PlanStep::Click {
                selector: "text=Sign in button".to_string()
            }
        );
        assert_eq!(
            steps[4],
            PlanStep::WaitFor {
                selector: ".dashboard".to_string()
            }
        );
        assert_eq!(steps[5], PlanStep::Screenshot);
    }

    #[test]
    fn bare_url_degrades_to_navigate_and_screenshot() {
        let planner = Planner::new();
        let steps = planner.parse("what's on https://example.com today?", "No actions here.");
        assert_eq!(
            steps,
            vec![
                PlanStep::Navigate {
                    url: "https://example.com".to_string()
                },
                PlanStep::Screenshot,
            ]
        );
    }

    #[test]
    fn nothing_parseable_yields_empty_plan() {
        let planner = Planner::new();
        assert!(planner.parse("hello", "just words").is_empty());
    }

    #[test]
    fn selector_normalization_rules() {
        assert_eq!(normalize_selector("#login"), "#login");
        assert_eq!(normalize_selector(".btn-primary"), ".btn-primary");
        assert_eq!(normalize_selector("[name=q]"), "[name=q]");
        assert_eq!(normalize_selector("text=Sign in"), "text=Sign in");
        assert_eq!(normalize_selector("xpath=//a[1]"), "xpath=//a[1]");
        assert_eq!(normalize_selector("Sign in button"), "text=Sign in button");
        assert_eq!(normalize_selector("submit"), "submit");
    }
}
