mod browser_cmd;
mod daemon;
mod harness_cmd;
mod memory_cmd;
mod metrics_cmd;
mod permission_cmd;
mod skills_cmd;
mod task_cmd;
mod tools_cmd;

use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::core::paths::StatePaths;
use crate::core::repository::Repository;
use crate::core::settings::Settings;
use crate::core::terminal::{self, GuideSection};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Daemon")
        .command("start", "Run the queue processor in the foreground")
        .print();

    GuideSection::new("Harness")
        .command("harness status", "Show harness configuration and runner health")
        .command("harness enable|disable", "Toggle the harness")
        .command("harness autonomy <level>", "Set autonomy: low|normal|strict")
        .print();

    GuideSection::new("Inspection")
        .command("task list", "Recent task runs")
        .command("task show <runId>", "One run with its events and steps")
        .command("metrics", "Counters and the response loss rate")
        .print();

    GuideSection::new("Memory & Skills")
        .command("memory show [user] [topic]", "Stored facts")
        .command("memory forget <user> <topic>", "Delete matching facts")
        .command("memory summarize [date]", "Build the daily summary")
        .command("skills list|show|draft|activate|disable|rollback", "Skill management")
        .print();

    GuideSection::new("Browser & Permissions")
        .command("browser sessions|tabs|attach", "Session inspection")
        .command("browser approve|deny <reqId>", "Decide a held action")
        .command("browser replay <runId>", "Replay a recorded trace")
        .command("permission list|grant|revoke", "Per-user permissions")
        .command("tools list|register|approve|block", "Tool registry")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("tinyagi").green()
    );
}

/// Shared CLI context: resolved state home, settings, and the repository.
pub(crate) struct CliContext {
    pub paths: StatePaths,
    pub settings: Settings,
    pub repo: Arc<Repository>,
}

pub(crate) fn open_context() -> Result<CliContext> {
    let paths = StatePaths::resolve()?;
    let settings = Settings::load(&paths)?;
    let repo = Arc::new(Repository::open(&paths.state_db())?);
    Ok(CliContext {
        paths,
        settings,
        repo,
    })
}

pub async fn run_main() -> Result<i32> {
    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_help();
        return Ok(0);
    };

    match command.as_str() {
        "start" => {
            daemon::run().await?;
            Ok(0)
        }
        "harness" => harness_cmd::run(&args[2..]).await,
        "task" => task_cmd::run(&args[2..]).await,
        "memory" => memory_cmd::run(&args[2..]).await,
        "browser" => browser_cmd::run(&args[2..]).await,
        "permission" => permission_cmd::run(&args[2..]).await,
        "tools" => tools_cmd::run(&args[2..]).await,
        "skills" => skills_cmd::run(&args[2..]).await,
        "metrics" => metrics_cmd::run(&args[2..]).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(0)
        }
        other => {
            terminal::print_error(&format!("Unknown command `{other}`"));
            print_help();
            Ok(1)
        }
    }
}

pub(crate) fn usage(message: &str) -> Result<i32> {
    terminal::print_error(message);
    Ok(1)
}
