use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::terminal::print_error;

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("list") => list().await,
        Some("show") => match args.get(1) {
            Some(run_id) => show(run_id).await,
            None => usage("Usage: tinyagi task show <runId>"),
        },
        _ => usage("Usage: tinyagi task list | show <runId>"),
    }
}

async fn list() -> Result<i32> {
    let ctx = open_context()?;
    let runs = ctx.repo.list_runs(25).await?;
    if runs.is_empty() {
        println!("No runs yet.");
        return Ok(0);
    }
    for run in runs {
        let when = chrono::DateTime::from_timestamp_millis(run.created_at)
            .map(|t| t.format("%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let objective: String = run.objective.chars().take(56).collect();
        println!(
            "{}  {:<18} {:<10} @{:<10} {}",
            style(when).dim(),
            style(&run.run_id).cyan(),
            run.status.as_str(),
            run.assigned_agent,
            objective
        );
    }
    Ok(0)
}

async fn show(run_id: &str) -> Result<i32> {
    let ctx = open_context()?;
    let Some(run) = ctx.repo.get_run(run_id).await? else {
        print_error(&format!("No run {run_id}"));
        return Ok(1);
    };

    println!("{} {}", style("Run").bold(), style(&run.run_id).cyan());
    println!("  status:    {}", run.status.as_str());
    println!("  risk:      {}", run.risk_level.as_str());
    println!(
        "  loop:      {}/{} ({})",
        run.loop_iteration,
        run.max_iterations,
        run.verifier_outcome
            .map(|o| o.as_str())
            .unwrap_or("not verified")
    );
    println!("  agent:     @{}", run.assigned_agent);
    println!("  channel:   {} ({})", run.channel, run.sender);
    println!("  objective: {}", run.objective);
    if let Some(result) = &run.result_text {
        println!("  result:    {}", result.lines().next().unwrap_or(""));
    }

    let events = ctx.repo.list_events(run_id).await?;
    if !events.is_empty() {
        println!("\n{}", style("Events").bold());
        for event in events {
            let when = chrono::DateTime::from_timestamp_millis(event.created_at)
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            println!("  {} {:<26} {}", style(when).dim(), event.kind, event.payload);
        }
    }

    let steps = ctx.repo.list_steps(run_id).await?;
    if !steps.is_empty() {
        println!("\n{}", style("Steps").bold());
        for step in steps {
            let preview: String = step.content.chars().take(80).collect();
            println!("  #{} {:<9} {}", step.iteration, step.phase, preview);
        }
    }
    Ok(0)
}
