use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use super::{BrowserExecutor, PlanStep, TraceEntry};
use crate::core::types::{now_millis, ExecOutcome};

/// Rebuild a plan from the most recent tab's selector trace for `run_id`
/// and execute it under a fresh replay run id.
///
/// Successful and checkpoint entries replay (the checkpoint is where the
/// human took over, so it is worth reaching again); failed and ill-formed
/// entries are dropped, and a navigate to the base URL is prepended so the
/// replay starts from a known page.
pub async fn replay_run(
    executor: &BrowserExecutor,
    run_id: &str,
    user_id: &str,
) -> Result<ExecOutcome> {
    let Some(tab) = executor.repo.latest_tab_for_run(run_id).await? else {
        return Ok(ExecOutcome::needs_input(format!(
            "No replayable browser trace found for run {run_id}."
        )));
    };

    let entries: Vec<TraceEntry> =
        serde_json::from_str(&tab.selector_trace).unwrap_or_default();
    let plan = plan_from_trace(&entries);
    if plan.is_empty() {
        return Ok(ExecOutcome::needs_input(format!(
            "No replayable browser trace found for run {run_id}."
        )));
    }

    let replay_run_id = format!(
        "replay_{}_{}",
        now_millis(),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    info!(
        "Replaying {} step(s) of {} as {}",
        plan.len(),
        run_id,
        replay_run_id
    );
    executor.run_plan(&replay_run_id, user_id, &plan).await
}

/// Trace entries -> plan steps. Dedup by actionId, keep only successful
/// and checkpoint entries, drop anything missing its required fields.
pub fn plan_from_trace(entries: &[TraceEntry]) -> Vec<PlanStep> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut steps = Vec::new();

    for entry in entries {
        if entry.status != "success" && entry.status != "checkpoint" {
            continue;
        }
        if !seen.insert(entry.action_id.as_str()) {
            continue;
        }
        let Some(step) = step_from_entry(entry) else {
            continue;
        };
        steps.push(step);
    }

    if steps.is_empty() {
        return steps;
    }

    // Start from a known page: the first recorded URL's origin.
    let base = entries.iter().find_map(|e| e.url.as_deref());
    if let Some(url) = base {
        let origin = url_origin(url);
        let already_navigates = matches!(steps.first(), Some(PlanStep::Navigate { .. }));
        if !already_navigates {
            steps.insert(0, PlanStep::Navigate { url: origin });
        }
    }
    steps
}

fn step_from_entry(entry: &TraceEntry) -> Option<PlanStep> {
    match entry.kind.as_str() {
        "navigate" => Some(PlanStep::Navigate {
            url: entry.url.clone()?,
        }),
        "click" => Some(PlanStep::Click {
            selector: entry.selector.clone()?,
        }),
        "type" => Some(PlanStep::Type {
            value: entry.value.clone()?,
            selector: entry.selector.clone()?,
        }),
        "fill" => Some(PlanStep::Fill {
            selector: entry.selector.clone()?,
            value: entry.value.clone()?,
        }),
        "wait_for" => Some(PlanStep::WaitFor {
            selector: entry.selector.clone()?,
        }),
        "press" => Some(PlanStep::Press {
            key: entry.value.clone()?,
        }),
        "screenshot" => Some(PlanStep::Screenshot),
        "extract_text" => Some(PlanStep::ExtractText {
            selector: entry.selector.clone()?,
        }),
        _ => None,
    }
}

fn url_origin(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        match rest.find('/') {
            Some(path_start) => url[..scheme_end + 3 + path_start].to_string(),
            None => url.to_string(),
        }
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action_id: &str, kind: &str, status: &str) -> TraceEntry {
        TraceEntry {
            action_id: action_id.to_string(),
            kind: kind.to_string(),
            selector: Some("#el".to_string()),
            value: Some("v".to_string()),
            url: None,
            status: status.to_string(),
            ts: 0,
        }
    }

    #[test]
    fn replay_plan_is_an_ordered_subsequence() {
        let mut nav = entry("a1", "navigate", "success");
        nav.url = Some("https://app.example.com/login".to_string());
        let entries = vec![
            nav,
            entry("a2", "fill", "success"),
            entry("a3", "click", "failed"),
            entry("a4", "click", "success"),
            entry("a5", "wait_for", "checkpoint"),
        ];
        let plan = plan_from_trace(&entries);
        let kinds: Vec<&str> = plan.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["navigate", "fill", "click", "wait_for"]);
    }

    #[test]
    fn duplicate_action_ids_replay_once() {
        let entries = vec![
            entry("a1", "click", "success"),
            entry("a1", "click", "success"),
            entry("a2", "click", "success"),
        ];
        let plan = plan_from_trace(&entries);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn ill_formed_entries_are_dropped() {
        let mut broken = entry("a1", "fill", "success");
        broken.selector = None;
        let mut unknown = entry("a2", "teleport", "success");
        unknown.selector = Some("#x".to_string());
        let entries = vec![broken, unknown, entry("a3", "click", "success")];
        let plan = plan_from_trace(&entries);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind(), "click");
    }

    #[test]
    fn navigate_to_origin_is_prepended() {
        let mut fill = entry("a1", "fill", "success");
        fill.url = Some("https://app.example.com/settings/profile".to_string());
        let plan = plan_from_trace(&[fill]);
        assert_eq!(
            plan[0],
            PlanStep::Navigate {
                url: "https://app.example.com".to_string()
            }
        );
        assert_eq!(plan[1].kind(), "fill");
    }
}
