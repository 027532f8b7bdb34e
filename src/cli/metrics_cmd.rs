use anyhow::Result;
use console::style;

use super::{open_context, usage};

pub async fn run(args: &[String]) -> Result<i32> {
    if !args.is_empty() {
        return usage("Usage: tinyagi metrics");
    }

    let ctx = open_context()?;
    let metrics = ctx.repo.list_metrics().await?;
    if metrics.is_empty() {
        println!("No metrics recorded yet.");
        return Ok(0);
    }

    for (name, value) in &metrics {
        println!("{:<36} {}", name, style(value).bold());
    }

    let delivered = ctx.repo.get_metric("responses_delivered_count").await?;
    let dropped = ctx.repo.get_metric("responses_dropped_count").await?;
    let loss_rate = if delivered + dropped > 0.0 {
        dropped / (delivered + dropped)
    } else {
        0.0
    };
    println!(
        "{:<36} {}",
        "response_loss_rate",
        style(format!("{loss_rate:.4}")).bold()
    );
    Ok(0)
}
