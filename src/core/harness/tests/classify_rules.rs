use crate::core::harness::Classifier;
use crate::core::types::{RiskLevel, TaskRoute};

#[test]
fn empty_match_is_low_risk() {
    let c = Classifier::new();
    let decision = c.classify_risk("tell me a joke");
    assert_eq!(decision.level, RiskLevel::Low);
    assert!(!decision.reasons.is_empty());
}

#[test]
fn maximum_matched_level_wins() {
    let c = Classifier::new();
    // Matches both "install" (medium) and "payment" (critical).
    let decision = c.classify_risk("install the payment plugin");
    assert_eq!(decision.level, RiskLevel::Critical);
    assert!(decision.reasons.len() >= 2);
}

#[test]
fn credentials_are_high_risk() {
    let c = Classifier::new();
    assert_eq!(
        c.classify_risk("log into the portal with my password").level,
        RiskLevel::High
    );
}

#[test]
fn route_precedence_browser_over_tooling() {
    let c = Classifier::new();
    // "install" alone is tooling; adding a browser keyword flips it.
    assert_eq!(c.determine_route("install htop").route, TaskRoute::Tooling);
    assert_eq!(
        c.determine_route("open the browser and install the extension").route,
        TaskRoute::Browser
    );
}

#[test]
fn route_precedence_tooling_over_memory() {
    let c = Classifier::new();
    assert_eq!(
        c.determine_route("remember to install ripgrep").route,
        TaskRoute::Tooling
    );
    assert_eq!(
        c.determine_route("remember that I like short answers").route,
        TaskRoute::Memory
    );
}

#[test]
fn default_route_is_agent() {
    let c = Classifier::new();
    let decision = c.determine_route("summarize this article for me");
    assert_eq!(decision.route, TaskRoute::Agent);
    assert!(!decision.reasons.is_empty());
}
