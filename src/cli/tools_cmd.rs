use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::repository::{tool_slug, Permission, ToolRecord};
use crate::core::terminal::{print_error, print_success};

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("list") => list().await,
        Some("register") => match (args.get(1), args.get(2)) {
            (Some(name), Some(source)) => register(name, source).await,
            _ => usage("Usage: tinyagi tools register <name> <source>"),
        },
        Some("approve") => match args.get(1) {
            Some(name) => set_status(name, "approved", args.get(2)).await,
            None => usage("Usage: tinyagi tools approve <name> [userId]"),
        },
        Some("block") => match args.get(1) {
            Some(name) => set_status(name, "blocked", args.get(2)).await,
            None => usage("Usage: tinyagi tools block <name> [userId]"),
        },
        _ => usage(
            "Usage: tinyagi tools list | register <name> <source> | approve <name> [userId] | block <name> [userId]",
        ),
    }
}

async fn list() -> Result<i32> {
    let ctx = open_context()?;
    let tools = ctx.repo.list_tools().await?;
    if tools.is_empty() {
        println!("No tools registered.");
        return Ok(0);
    }
    for tool in tools {
        println!(
            "{}  {:<12} {:<10} {}",
            style(&tool.tool_id).cyan(),
            tool.trust_class,
            tool.status,
            tool.source,
        );
    }
    Ok(0)
}

async fn register(name: &str, source: &str) -> Result<i32> {
    let ctx = open_context()?;
    let trust_class = match source {
        "builtin" | "allowlist" => "mainstream",
        s if s.starts_with("https://github.com/") => "mainstream",
        _ => "unknown",
    };
    ctx.repo
        .upsert_tool(&ToolRecord {
            tool_id: tool_slug(name),
            name: name.to_string(),
            source: source.to_string(),
            trust_class: trust_class.to_string(),
            status: "pending".to_string(),
            metadata: serde_json::json!({}),
            created_at: 0,
            updated_at: 0,
        })
        .await?;
    print_success(&format!("Registered `{name}` ({trust_class}, pending)."));
    Ok(0)
}

async fn set_status(name: &str, status: &str, user: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    if !ctx.repo.set_tool_status(name, status).await? {
        print_error(&format!("No tool `{name}` registered."));
        return Ok(1);
    }

    // Approving for a specific user also grants their execute permission;
    // blocking revokes it.
    if let Some(user) = user {
        if status == "approved" {
            let mut perm = Permission::pending(user, name, "execute", Some("tool"));
            perm.status = "active".to_string();
            ctx.repo.create_permission(&perm).await?;
        } else {
            for perm in ctx.repo.list_permissions(Some(user)).await? {
                if perm.subject == *name && perm.status == "active" {
                    ctx.repo
                        .set_permission_status(&perm.permission_id, "revoked")
                        .await?;
                }
            }
        }
    }

    print_success(&format!("Tool `{name}` is now {status}."));
    Ok(0)
}
