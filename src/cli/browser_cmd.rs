use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::browser::{replay_run, BrowserExecutor};
use crate::core::terminal::{print_error, print_success};

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("sessions") => sessions().await,
        Some("tabs") => tabs(args.get(1)).await,
        Some("attach") => attach().await,
        Some("approve") => match args.get(1) {
            Some(id) => decide(id, true).await,
            None => usage("Usage: tinyagi browser approve <reqId>"),
        },
        Some("deny") => match args.get(1) {
            Some(id) => decide(id, false).await,
            None => usage("Usage: tinyagi browser deny <reqId>"),
        },
        Some("approvals") => approvals(args.get(1)).await,
        Some("replay") => match args.get(1) {
            Some(run_id) => replay(run_id, args.get(2)).await,
            None => usage("Usage: tinyagi browser replay <runId> [userId]"),
        },
        _ => usage(
            "Usage: tinyagi browser sessions | tabs [runId] | attach | approve <reqId> | deny <reqId> | approvals [userId] | replay <runId> [userId]",
        ),
    }
}

async fn sessions() -> Result<i32> {
    let ctx = open_context()?;
    let sessions = ctx.repo.list_browser_sessions().await?;
    if sessions.is_empty() {
        println!("No browser sessions recorded.");
        return Ok(0);
    }
    for session in sessions {
        println!(
            "{}  {}:{}  {:<8} {}",
            style(&session.session_id).cyan(),
            session.host,
            session.port,
            session.status,
            session.profile_path.as_deref().unwrap_or("-"),
        );
    }
    Ok(0)
}

async fn tabs(run_id: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let tabs = ctx.repo.list_browser_tabs(run_id.map(String::as_str)).await?;
    if tabs.is_empty() {
        println!("No tabs recorded.");
        return Ok(0);
    }
    for tab in tabs {
        let steps = serde_json::from_str::<serde_json::Value>(&tab.selector_trace)
            .ok()
            .and_then(|v| v.as_array().map(|a| a.len()))
            .unwrap_or(0);
        println!(
            "{}  run={}  {:<9} {} trace step(s)",
            style(&tab.tab_id).cyan(),
            tab.run_id,
            tab.status,
            steps
        );
    }
    Ok(0)
}

async fn attach() -> Result<i32> {
    let ctx = open_context()?;
    let executor = BrowserExecutor::new(
        ctx.repo.clone(),
        ctx.paths.clone(),
        ctx.settings.harness.browser.clone(),
    );
    // A one-step plan proves the session end to end.
    match executor
        .run_plan(
            &format!("attach_{}", crate::core::types::now_millis()),
            "operator",
            &[crate::core::browser::PlanStep::Screenshot],
        )
        .await
    {
        Ok(outcome) => {
            println!("{}", outcome.message);
            Ok(0)
        }
        Err(e) => {
            print_error(&format!("Attach failed: {e:#}"));
            Ok(1)
        }
    }
}

async fn decide(id: &str, approve: bool) -> Result<i32> {
    let ctx = open_context()?;
    let decided = if id.starts_with("perm_") {
        ctx.repo
            .set_permission_status(id, if approve { "active" } else { "revoked" })
            .await?
    } else {
        ctx.repo.decide_browser_approval(id, approve).await?
    };
    if decided {
        print_success(&format!(
            "{id} {}.",
            if approve { "approved" } else { "denied" }
        ));
        Ok(0)
    } else {
        print_error(&format!("No pending request {id}."));
        Ok(1)
    }
}

async fn approvals(user: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let approvals = ctx
        .repo
        .list_browser_approvals(user.map(String::as_str))
        .await?;
    if approvals.is_empty() {
        println!("No approvals recorded.");
        return Ok(0);
    }
    for approval in approvals {
        println!(
            "{}  run={}  {:<9} {}",
            style(&approval.approval_id).cyan(),
            approval.run_id,
            approval.status,
            approval.reason.as_deref().unwrap_or("-"),
        );
    }
    Ok(0)
}

async fn replay(run_id: &str, user: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let executor = BrowserExecutor::new(
        ctx.repo.clone(),
        ctx.paths.clone(),
        ctx.settings.harness.browser.clone(),
    );
    let outcome = replay_run(
        &executor,
        run_id,
        user.map(String::as_str).unwrap_or("operator"),
    )
    .await?;
    println!("{}", outcome.message);
    Ok(0)
}
