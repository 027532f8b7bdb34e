use anyhow::Result;
use console::style;

use super::{open_context, usage};
use crate::core::repository::Permission;
use crate::core::terminal::{print_error, print_success};

pub async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("list") => list(args.get(1)).await,
        Some("grant") => match (args.get(1), args.get(2), args.get(3)) {
            (Some(user), Some(subject), Some(action)) => {
                grant(user, subject, action, args.get(4)).await
            }
            _ => usage("Usage: tinyagi permission grant <userId> <subject> <action> [resource]"),
        },
        Some("revoke") => match args.get(1) {
            Some(id) => revoke(id).await,
            None => usage("Usage: tinyagi permission revoke <permissionId>"),
        },
        _ => usage(
            "Usage: tinyagi permission list [userId] | grant <userId> <subject> <action> [resource] | revoke <permissionId>",
        ),
    }
}

async fn list(user: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;
    let permissions = ctx.repo.list_permissions(user.map(String::as_str)).await?;
    if permissions.is_empty() {
        println!("No permissions recorded.");
        return Ok(0);
    }
    for perm in permissions {
        println!(
            "{}  {:<12} {:<16} {:<10} {:<8} {}",
            style(&perm.permission_id).cyan(),
            perm.user_id,
            perm.subject,
            perm.action,
            perm.status,
            perm.resource.as_deref().unwrap_or("-"),
        );
    }
    Ok(0)
}

async fn grant(user: &str, subject: &str, action: &str, resource: Option<&String>) -> Result<i32> {
    let ctx = open_context()?;

    // An existing pending request for the same triple just gets activated.
    if let Some(pending) = ctx
        .repo
        .find_pending_permission(user, subject, action)
        .await?
    {
        ctx.repo
            .set_permission_status(&pending.permission_id, "active")
            .await?;
        print_success(&format!(
            "Activated pending request {} for {user}: {subject} {action}.",
            pending.permission_id
        ));
        return Ok(0);
    }

    let mut perm = Permission::pending(user, subject, action, resource.map(String::as_str));
    perm.status = "active".to_string();
    let id = perm.permission_id.clone();
    ctx.repo.create_permission(&perm).await?;
    print_success(&format!("Granted {id}: {user} may {action} {subject}."));
    Ok(0)
}

async fn revoke(id: &str) -> Result<i32> {
    let ctx = open_context()?;
    if ctx.repo.set_permission_status(id, "revoked").await? {
        print_success(&format!("Revoked {id}."));
        Ok(0)
    } else {
        print_error(&format!("No permission {id}."));
        Ok(1)
    }
}
