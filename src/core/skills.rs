use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use tracing::info;

use crate::core::paths::StatePaths;
use crate::core::repository::{Repository, Skill};
use crate::core::types::TaskRoute;

/// Signals on a finished run that may auto-draft a reusable skill.
#[derive(Debug, Clone)]
pub struct AutoDraftSignal<'a> {
    pub user_id: &'a str,
    pub run_id: &'a str,
    pub objective: &'a str,
    pub route: TaskRoute,
    pub verified: bool,
}

/// Versioned skill drafts. A verified run whose objective smells like a
/// repeatable workflow becomes a draft SKILL.md for the user to activate.
pub struct SkillsService {
    repo: Arc<Repository>,
    paths: StatePaths,
    trigger_re: Regex,
    tooling_re: Regex,
    browser_re: Regex,
}

impl SkillsService {
    pub fn new(repo: Arc<Repository>, paths: StatePaths) -> Self {
        Self {
            repo,
            paths,
            trigger_re: Regex::new(
                r"(?i)\b(always|every time|automate|repeat this|workflow|template)\b",
            )
            .unwrap(),
            tooling_re: Regex::new(r"(?i)\b(install|configure)\b").unwrap(),
            browser_re: Regex::new(r"(?i)\b(login|log in|submit|portal|dashboard)\b").unwrap(),
        }
    }

    /// Returns the new skill id when a draft was created.
    pub async fn maybe_autodraft(&self, signal: &AutoDraftSignal<'_>) -> Result<Option<String>> {
        if !signal.verified {
            return Ok(None);
        }
        let triggered = self.trigger_re.is_match(signal.objective)
            || match signal.route {
                TaskRoute::Tooling => self.tooling_re.is_match(signal.objective),
                TaskRoute::Browser => self.browser_re.is_match(signal.objective),
                _ => false,
            };
        if !triggered {
            return Ok(None);
        }

        let name = derive_skill_name(signal.objective);
        if self.repo.get_skill_by_name(&name).await?.is_some() {
            return Ok(None);
        }

        let skill = self
            .write_draft(&name, signal.objective, Some(signal.route))
            .await?;
        self.repo
            .record_event(
                signal.run_id,
                "skill_autodraft",
                &serde_json::json!({
                    "skillId": skill.skill_id,
                    "name": name,
                    "route": signal.route.as_str(),
                    "userId": signal.user_id,
                }),
            )
            .await?;
        self.repo
            .increment_metric("skills_autodrafted_count", 1.0, None)
            .await?;
        info!("Skill auto-drafted: {} ({})", name, skill.skill_id);
        Ok(Some(skill.skill_id))
    }

    /// Manual draft via the CLI.
    pub async fn draft(&self, name: &str, prompt: &str) -> Result<Skill> {
        let normalized = normalize_name(name);
        if let Some(existing) = self.repo.get_skill_by_name(&normalized).await? {
            return Ok(existing);
        }
        self.write_draft(&normalized, prompt, None).await
    }

    async fn write_draft(
        &self,
        name: &str,
        playbook: &str,
        route: Option<TaskRoute>,
    ) -> Result<Skill> {
        let skill_id = format!(
            "skill_{}",
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );
        let dir = self.paths.skill_dir(&skill_id);
        std::fs::create_dir_all(&dir)?;

        let route_line = route
            .map(|r| format!("route: {}\n", r.as_str()))
            .unwrap_or_default();
        let content = format!(
            "---\nname: {name}\ndescription: Drafted from a verified run\nversion: 1\nstatus: draft\n{route_line}---\n\n## Playbook\n\n{playbook}\n"
        );
        let path = dir.join("SKILL.md");
        std::fs::write(&path, content)?;

        let skill = Skill {
            skill_id: skill_id.clone(),
            name: name.to_string(),
            status: "draft".to_string(),
            content_path: path.to_string_lossy().to_string(),
            current_version: 1,
            created_at: 0,
            updated_at: 0,
        };
        self.repo.create_skill(&skill).await?;
        Ok(skill)
    }
}

/// Skill name from the first significant words of the objective.
fn derive_skill_name(objective: &str) -> String {
    normalize_name(
        &objective
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn normalize_name(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut out = String::new();
    let mut prev_dash = false;
    for c in slug.chars() {
        if c == '-' {
            if !prev_dash && !out.is_empty() {
                out.push('-');
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out.trim_end_matches('-').chars().take(48).collect()
}
