use regex::Regex;

/// One fact pulled out of free text, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub category: &'static str,
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

pub struct Extractor {
    rules: Vec<(Regex, &'static str, f64)>,
}

impl Extractor {
    pub fn new() -> Self {
        let rule = |pattern: &str, category: &'static str, confidence: f64| {
            (Regex::new(pattern).unwrap(), category, confidence)
        };
        Self {
            rules: vec![
                // Explicit corrections outrank everything they restate.
                rule(r"(?i)\bactually,?\s+([^.!?\n]{4,120})", "confirmed_facts", 0.9),
                rule(r"(?i)\bremember that\s+([^.!?\n]{4,160})", "task_states", 0.85),
                rule(r"(?i)\bI prefer\s+([^.!?\n]{3,120})", "preferences", 0.8),
                rule(r"(?i)\bplease always\s+([^.!?\n]{3,120})", "preferences", 0.8),
                rule(
                    r"(?i)\b(?:this is my workflow|my workflow is)[:\s]+([^\n]{4,200})",
                    "workflows",
                    0.75,
                ),
                rule(
                    r"(?i)\b(?:I'?m working on|my project(?: is| called)?)\s+([^.!?\n]{3,120})",
                    "projects",
                    0.7,
                ),
            ],
        }
    }

    /// Run every extractor, then dedup by (category, key, lowercased value)
    /// keeping the highest-confidence hit.
    pub fn extract(&self, text: &str) -> Vec<ExtractedFact> {
        let mut facts: Vec<ExtractedFact> = Vec::new();
        for (re, category, confidence) in &self.rules {
            for caps in re.captures_iter(text) {
                let value = caps.get(1).unwrap().as_str().trim().trim_end_matches(',');
                if value.is_empty() {
                    continue;
                }
                facts.push(ExtractedFact {
                    category,
                    key: derive_key(value),
                    value: value.to_string(),
                    confidence: *confidence,
                });
            }
        }

        let mut deduped: Vec<ExtractedFact> = Vec::new();
        for fact in facts {
            let dup_of = deduped.iter_mut().find(|f| {
                f.category == fact.category
                    && f.key == fact.key
                    && f.value.to_lowercase() == fact.value.to_lowercase()
            });
            match dup_of {
                Some(existing) => {
                    if fact.confidence > existing.confidence {
                        *existing = fact;
                    }
                }
                None => deduped.push(fact),
            }
        }
        deduped
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "in", "on", "for", "with", "and", "or", "my", "me", "is",
    "are", "be", "this", "that", "it",
];

/// Stable key from the first significant words of the value.
fn derive_key(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .take(4)
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_extraction() {
        let ex = Extractor::new();
        let facts = ex.extract("I prefer concise bullet updates. Remember this preference.");
        assert!(facts
            .iter()
            .any(|f| f.category == "preferences" && f.value.contains("concise bullet updates")));
    }

    #[test]
    fn corrections_and_task_states() {
        let ex = Extractor::new();
        let facts = ex.extract(
            "Remember that the standup moved to 9:30. Actually, the demo is on Friday now.",
        );
        assert!(facts.iter().any(|f| f.category == "task_states"));
        let correction = facts.iter().find(|f| f.category == "confirmed_facts").unwrap();
        assert!(correction.value.contains("demo is on Friday"));
        assert!((correction.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_hits_keep_highest_confidence() {
        let ex = Extractor::new();
        // Same value surfaces through two rules at different confidence.
        let facts =
            ex.extract("I prefer dark mode. Please always dark mode.");
        let dark: Vec<_> = facts
            .iter()
            .filter(|f| f.category == "preferences" && f.key == "dark_mode")
            .collect();
        assert_eq!(dark.len(), 1);
    }

    #[test]
    fn key_derivation_skips_stopwords() {
        assert_eq!(derive_key("the concise bullet updates"), "concise_bullet_updates");
        assert_eq!(derive_key("working on the billing revamp"), "working_billing_revamp");
    }

    #[test]
    fn idempotent_on_same_text() {
        let ex = Extractor::new();
        let a = ex.extract("I prefer tea over coffee.");
        let b = ex.extract("I prefer tea over coffee.");
        assert_eq!(a, b);
    }
}
