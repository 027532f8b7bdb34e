use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::skills::SkillsService;
use crate::core::terminal::{print_error, print_success};

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("list") => list().await,
        Some("show") => match args.get(1) {
            Some(id) => show(id).await,
            None => usage("Usage: tinyagi skills show <id>"),
        },
        Some("draft") => match (args.get(1), args.get(2)) {
            (Some(name), Some(_)) => draft(name, &args[2..].join(" ")).await,
            _ => usage("Usage: tinyagi skills draft <name> <prompt>"),
        },
        Some("activate") => match args.get(1) {
            Some(id) => set_status(id, "active").await,
            None => usage("Usage: tinyagi skills activate <id>"),
        },
        Some("disable") => match args.get(1) {
            Some(id) => set_status(id, "disabled").await,
            None => usage("Usage: tinyagi skills disable <id>"),
        },
        Some("rollback") => match args.get(1) {
            Some(id) => rollback(id, args.get(2)).await,
            None => usage("Usage: tinyagi skills rollback <id> [version]"),
        },
        _ => usage(
            "Usage: tinyagi skills list | show <id> | draft <name> <prompt> | activate <id> | disable <id> | rollback <id> [version]",
        ),
    }
}

async fn list() -> Result<i32> {
    let ctx = open_context()?;
    let skills = ctx.repo.list_skills().await?;
    if skills.is_empty() {
        println!("No skills yet.");
        return Ok(0);
    }
    for skill in skills {
        println!(
            "{}  {:<32} {:<9} v{}",
            style(&skill.skill_id).cyan(),
            skill.name,
            skill.status,
            skill.current_version,
        );
    }
    Ok(0)
}

async fn show(id: &str) -> Result<i32> {
    let ctx = open_context()?;
    let Some(skill) = ctx.repo.get_skill(id).await? else {
        print_error(&format!("No skill {id}."));
        return Ok(1);
    };

    println!("{} {}", style("Skill").bold(), style(&skill.skill_id).cyan());
    println!("  name:    {}", skill.name);
    println!("  status:  {}", skill.status);
    println!("  content: {}", skill.content_path);

    println!("\n{}", style("Versions").bold());
    for version in ctx.repo.list_skill_versions(id).await? {
        let marker = if version.version == skill.current_version {
            " (current)"
        } else {
            ""
        };
        println!("  v{} — {}{}", version.version, version.content_path, marker);
    }
    Ok(0)
}

async fn draft(name: &str, prompt: &str) -> Result<i32> {
    let ctx = open_context()?;
    let service = SkillsService::new(ctx.repo.clone(), ctx.paths.clone());
    let skill = service.draft(name, prompt).await?;
    print_success(&format!("Drafted {} ({}).", skill.name, skill.skill_id));
    Ok(0)
}

async fn set_status(id: &str, status: &str) -> Result<i32> {
    let ctx = open_context()?;
    if ctx.repo.set_skill_status(id, status).await? {
        print_success(&format!("Skill {id} is now {status}."));
        Ok(0)
    } else {
        print_error(&format!("No skill {id}."));
        Ok(1)
    }
}

async fn rollback(id: &str, version: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let target = match version {
        Some(raw) => match raw.trim_start_matches('v').parse::<u32>() {
            Ok(v) => v,
            Err(_) => return usage("Version must be a number"),
        },
        None => {
            let Some(skill) = ctx.repo.get_skill(id).await? else {
                print_error(&format!("No skill {id}."));
                return Ok(1);
            };
            skill.current_version.saturating_sub(1).max(1)
        }
    };

    if ctx.repo.rollback_skill(id, target).await? {
        print_success(&format!("Skill {id} rolled back to v{target}."));
        Ok(0)
    } else {
        print_error(&format!("Skill {id} has no v{target}."));
        Ok(1)
    }
}
