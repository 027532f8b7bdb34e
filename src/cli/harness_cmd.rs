use anyhow::Result;

use super::{open_context, usage};
use crate::core::settings::Settings;
use crate::core::terminal::{print_success, GuideSection};

pub async fn run(args: &[String]) -> Result<i32> {
    let Some(sub) = args.first() else {
        return usage("Usage: tinyagi harness status|enable|disable|autonomy <level>");
    };

    match sub.as_str() {
        "status" => status().await,
        "enable" => set_enabled(true),
        "disable" => set_enabled(false),
        "autonomy" => match args.get(1).map(String::as_str) {
            Some(level @ ("low" | "normal" | "strict")) => set_autonomy(level),
            _ => usage("Usage: tinyagi harness autonomy low|normal|strict"),
        },
        _ => usage("Usage: tinyagi harness status|enable|disable|autonomy <level>"),
    }
}

async fn status() -> Result<i32> {
    let ctx = open_context()?;
    let harness = &ctx.settings.harness;

    let quiet = harness
        .quiet_hours
        .as_ref()
        .map(|q| format!("{} - {}", q.start, q.end))
        .unwrap_or_else(|| "off".to_string());

    let mut section = GuideSection::new("Harness")
        .status("Enabled", if harness.enabled { "yes" } else { "no" })
        .status("Autonomy", &harness.autonomy)
        .status("Quiet hours", &quiet)
        .status(
            "Digest time",
            harness.digest_time.as_deref().unwrap_or("off"),
        )
        .status(
            "Browser",
            if harness.browser.enabled {
                &harness.browser.provider
            } else {
                "disabled"
            },
        )
        .blank();

    // Runner health: is each configured binary actually on PATH?
    for agent in &ctx.settings.agents {
        let found = which(&agent.runner.binary);
        section = section.status(
            &format!("@{}", agent.id),
            &format!(
                "{} ({})",
                agent.runner.binary,
                if found { "found" } else { "NOT FOUND" }
            ),
        );
    }
    section.print();
    Ok(0)
}

fn which(binary: &str) -> bool {
    if binary.contains('/') {
        return std::path::Path::new(binary).exists();
    }
    std::process::Command::new("which")
        .arg(binary)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn set_enabled(enabled: bool) -> Result<i32> {
    let ctx = open_context()?;
    let mut settings = ctx.settings;
    settings.harness.enabled = enabled;
    settings.save(&ctx.paths)?;
    print_success(&format!(
        "Harness {}.",
        if enabled { "enabled" } else { "disabled" }
    ));
    Ok(0)
}

fn set_autonomy(level: &str) -> Result<i32> {
    let ctx = open_context()?;
    let mut settings: Settings = ctx.settings;
    settings.harness.autonomy = level.to_string();
    settings.save(&ctx.paths)?;
    print_success(&format!("Autonomy set to `{level}`."));
    Ok(0)
}
