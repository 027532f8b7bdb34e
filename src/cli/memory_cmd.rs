use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::memory::build_daily_summary;
use crate::core::terminal::print_success;

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("show") => show(args.get(1), args.get(2)).await,
        Some("forget") => match (args.get(1), args.get(2)) {
            (Some(user), Some(topic)) => forget(user, topic).await,
            _ => usage("Usage: tinyagi memory forget <userId> <topic>"),
        },
        Some("summarize") => summarize(args.get(1)).await,
        _ => usage("Usage: tinyagi memory show [userId] [topic] | forget <userId> <topic> | summarize [YYYY-MM-DD]"),
    }
}

async fn show(user: Option<&String>, topic: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let user = user.map(String::as_str).unwrap_or("default");
    let records = ctx.repo.list_memory(user, None).await?;

    let filtered: Vec<_> = records
        .into_iter()
        .filter(|r| match topic {
            Some(t) => {
                let t = t.to_lowercase();
                r.key.to_lowercase().contains(&t) || r.value.to_lowercase().contains(&t)
            }
            None => true,
        })
        .collect();

    if filtered.is_empty() {
        println!("Nothing stored for {user}.");
        return Ok(0);
    }
    for record in filtered {
        println!(
            "{} {} {} {}",
            style(format!("[{}]", record.category)).cyan(),
            style(&record.key).bold(),
            record.value,
            style(format!("({:.2})", record.confidence)).dim(),
        );
    }
    Ok(0)
}

async fn forget(user: &str, topic: &str) -> Result<i32> {
    let ctx = open_context()?;
    let removed = ctx.repo.forget_memory(user, topic).await?;
    print_success(&format!("Forgot {removed} record(s) matching `{topic}`."));
    Ok(0)
}

async fn summarize(date: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let date = match date {
        Some(raw) => match chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => return usage("Date must be YYYY-MM-DD"),
        },
        None => chrono::Utc::now().date_naive(),
    };
    let content = build_daily_summary(&ctx.repo, &ctx.paths, date).await?;
    println!("{content}");
    Ok(0)
}
