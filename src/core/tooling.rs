use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::repository::{Permission, Repository, ToolRecord};
use crate::core::repository::tool_slug;
use crate::core::types::ExecOutcome;

/// Tools the executor will ever run. argv[0] must be one of these.
pub const TOOL_ALLOWLIST: &[&str] = &[
    "npm", "npx", "pip", "pip3", "brew", "git", "docker", "pnpm", "yarn",
];

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);
const CAPTURE_LIMIT: usize = 24 * 1024;

/// Approval-gated subprocess executor for the `tooling` route. Commands
/// are extracted from the candidate output, sanitized, and run without a
/// shell under a per-user `execute` permission.
pub struct ToolingExecutor {
    repo: Arc<Repository>,
}

impl ToolingExecutor {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn execute(
        &self,
        run_id: &str,
        user_id: &str,
        objective: &str,
        candidate: &str,
    ) -> Result<ExecOutcome> {
        let Some(raw) = extract_command(objective, candidate) else {
            return Ok(ExecOutcome::needs_input(
                "I couldn't find a concrete command to run. Which exact command should I execute?",
            ));
        };

        let argv = match sanitize_command(&raw) {
            Ok(argv) => argv,
            Err(reason) => {
                self.repo
                    .increment_metric("tooling_rejected_count", 1.0, None)
                    .await?;
                return Ok(ExecOutcome::needs_input(format!(
                    "I can't run `{raw}`: {reason}"
                )));
            }
        };

        let tool = argv[0].clone();
        self.register_tool(&tool).await?;

        // Per-user execute permission; absent means a pending request.
        if self
            .repo
            .find_active_permission(user_id, &tool, "execute")
            .await?
            .is_none()
        {
            let request_id = match self
                .repo
                .find_pending_permission(user_id, &tool, "execute")
                .await?
            {
                Some(existing) => existing.permission_id,
                None => {
                    let pending = Permission::pending(user_id, &tool, "execute", Some("tool"));
                    let id = pending.permission_id.clone();
                    self.repo.create_permission(&pending).await?;
                    id
                }
            };
            return Ok(ExecOutcome::needs_approval(
                format!(
                    "Running `{raw}` needs your approval. \
                     Reply `/approve {request_id}` to allow `{tool}` commands, \
                     or `/deny {request_id}` to refuse."
                ),
                request_id,
            ));
        }

        self.repo
            .record_event(
                run_id,
                "execute_start",
                &serde_json::json!({ "command": raw, "tool": tool }),
            )
            .await?;
        info!("Tooling: executing `{}` for run {}", raw, run_id);

        let started = Instant::now();
        match self.run_command(&argv).await {
            Ok((code, output)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let ok = code == 0;
                self.repo
                    .record_event(
                        run_id,
                        if ok { "execute_success" } else { "execute_failed" },
                        &serde_json::json!({
                            "command": raw,
                            "exitCode": code,
                            "durationMs": duration_ms,
                        }),
                    )
                    .await?;
                self.repo
                    .increment_metric(
                        if ok {
                            "tooling_success_count"
                        } else {
                            "tooling_failed_count"
                        },
                        1.0,
                        None,
                    )
                    .await?;

                let message = format!(
                    "Exit code: {code} ({duration_ms} ms)\nCommand: {raw}\n\n{output}"
                );
                if ok {
                    Ok(ExecOutcome::completed(message))
                } else {
                    Ok(ExecOutcome::failed(message))
                }
            }
            Err(e) => {
                self.repo
                    .record_event(
                        run_id,
                        "execute_failed",
                        &serde_json::json!({ "command": raw, "error": e.to_string() }),
                    )
                    .await?;
                self.repo
                    .increment_metric("tooling_failed_count", 1.0, None)
                    .await?;
                Ok(ExecOutcome::failed(format!("Command failed to run: {e}")))
            }
        }
    }

    async fn register_tool(&self, tool: &str) -> Result<()> {
        let record = ToolRecord {
            tool_id: tool_slug(tool),
            name: tool.to_string(),
            source: "allowlist".to_string(),
            trust_class: trust_class_for(tool).to_string(),
            status: "approved".to_string(),
            metadata: serde_json::json!({}),
            created_at: 0,
            updated_at: 0,
        };
        self.repo.upsert_tool(&record).await
    }

    /// No shell, inherited env, bounded output ring, 120 s timeout with
    /// SIGTERM on expiry.
    async fn run_command(&self, argv: &[String]) -> Result<(i32, String)> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let mut ring = CaptureRing::new(CAPTURE_LIMIT);

        let capture = async {
            let mut out_buf = Vec::new();
            let mut err_buf = Vec::new();
            let out_fut = async {
                if let Some(pipe) = stdout.as_mut() {
                    let _ = pipe.read_to_end(&mut out_buf).await;
                }
            };
            let err_fut = async {
                if let Some(pipe) = stderr.as_mut() {
                    let _ = pipe.read_to_end(&mut err_buf).await;
                }
            };
            tokio::join!(out_fut, err_fut);
            (out_buf, err_buf)
        };

        let result = tokio::time::timeout(EXEC_TIMEOUT, async {
            let (out_buf, err_buf) = capture.await;
            let status = child.wait().await?;
            Ok::<_, anyhow::Error>((status, out_buf, err_buf))
        })
        .await;

        match result {
            Ok(Ok((status, out_buf, err_buf))) => {
                ring.push(&out_buf);
                if !err_buf.is_empty() {
                    ring.push(b"\n--- stderr ---\n");
                    ring.push(&err_buf);
                }
                Ok((status.code().unwrap_or(-1), ring.into_string()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                terminate(&mut child).await;
                anyhow::bail!("timed out after {} s", EXEC_TIMEOUT.as_secs())
            }
        }
    }
}

/// SIGTERM first, brief grace, then hard kill.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!("Tool process {} ignored SIGTERM, killing", pid);
    }
    let _ = child.kill().await;
}

/// Last-N-bytes ring so runaway output cannot blow up memory or the
/// outgoing message.
struct CaptureRing {
    buf: Vec<u8>,
    limit: usize,
}

impl CaptureRing {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.limit {
            let cut = self.buf.len() - self.limit;
            self.buf.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Find a runnable command in the candidate output: scan lines (stripping
/// list-item prefixes and code fences) for one starting with an allowlisted
/// tool, falling back to the first allowlisted token match anywhere.
pub fn extract_command(objective: &str, candidate: &str) -> Option<String> {
    for source in [candidate, objective] {
        for line in source.lines() {
            let line = strip_line_decorations(line);
            if line.is_empty() {
                continue;
            }
            let first = line.split_whitespace().next().unwrap_or_default();
            if TOOL_ALLOWLIST.contains(&first) {
                return Some(line.to_string());
            }
        }
    }

    // Fallback: first inline match like "… run `npm test` …".
    let re = regex::Regex::new(&format!(
        r"\b({})\b[^\n`]*",
        TOOL_ALLOWLIST.join("|")
    ))
    .unwrap();
    for source in [candidate, objective] {
        if let Some(m) = re.find(source) {
            return Some(m.as_str().trim().trim_end_matches('.').to_string());
        }
    }
    None
}

fn strip_line_decorations(line: &str) -> &str {
    let mut s = line.trim();
    for prefix in ["- ", "* ", "> ", "$ "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
        }
    }
    // "1. npm install" style list items.
    if let Some(dot) = s.find(". ") {
        if dot <= 2 && s[..dot].chars().all(|c| c.is_ascii_digit()) {
            s = s[dot + 2..].trim();
        }
    }
    s.trim_matches('`').trim()
}

/// Reject shell metacharacters, privilege escalation, and destructive
/// patterns, then tokenize quote-aware and check the allowlist.
pub fn sanitize_command(raw: &str) -> Result<Vec<String>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty command".to_string());
    }
    if trimmed.contains(';') || trimmed.contains('&') || trimmed.contains('|') || trimmed.contains('`')
    {
        return Err("shell metacharacters are not allowed".to_string());
    }
    if trimmed.split_whitespace().any(|t| t == "sudo") {
        return Err("sudo is not allowed".to_string());
    }
    if trimmed.contains("rm -rf") {
        return Err("destructive file removal is not allowed".to_string());
    }

    let argv = tokenize(trimmed)?;
    if argv.is_empty() {
        return Err("empty command".to_string());
    }
    if !TOOL_ALLOWLIST.contains(&argv[0].as_str()) {
        return Err(format!("`{}` is not an allowlisted tool", argv[0]));
    }
    Ok(argv)
}

/// Quote-aware tokenizer (no expansion, no escapes beyond quote pairing).
fn tokenize(raw: &str) -> Result<Vec<String>, String> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    argv.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if !current.is_empty() {
        argv.push(current);
    }
    Ok(argv)
}

fn trust_class_for(tool: &str) -> &'static str {
    match tool {
        "git" | "docker" | "brew" => "curated",
        t if TOOL_ALLOWLIST.contains(&t) => "mainstream",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecStatus;

    #[test]
    fn extracts_command_from_list_items_and_fences() {
        let candidate = "To set this up:\n- `npm install left-pad`\nthen you are done.";
        assert_eq!(
            extract_command("", candidate).as_deref(),
            Some("npm install left-pad")
        );

        let numbered = "1. pip3 install requests\n2. profit";
        assert_eq!(
            extract_command("", numbered).as_deref(),
            Some("pip3 install requests")
        );
    }

    #[test]
    fn falls_back_to_inline_match() {
        let candidate = "You should probably run npm audit fix here.";
        assert_eq!(
            extract_command("", candidate).as_deref(),
            Some("npm audit fix here")
        );
    }

    #[test]
    fn sanitize_rejects_shell_tricks() {
        assert!(sanitize_command("npm install; rm -rf /").is_err());
        assert!(sanitize_command("git log | head").is_err());
        assert!(sanitize_command("npm run `evil`").is_err());
        assert!(sanitize_command("sudo npm install").is_err());
        assert!(sanitize_command("git clean && rm -rf .").is_err());
        assert!(sanitize_command("").is_err());
        assert!(sanitize_command("curl https://example.com").is_err());
    }

    #[test]
    fn sanitize_tokenizes_quotes() {
        let argv = sanitize_command(r#"git commit -m "fix the thing""#).unwrap();
        assert_eq!(argv, vec!["git", "commit", "-m", "fix the thing"]);
        assert!(sanitize_command(r#"git commit -m "unterminated"#).is_err());
    }

    #[tokio::test]
    async fn missing_permission_yields_pending_request() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let exec = ToolingExecutor::new(repo.clone());

        let outcome = exec
            .execute("r1", "u", "npm --version", "run `npm --version`")
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::NeedsApproval);
        let request_id = outcome.request_id.unwrap();
        assert!(request_id.starts_with("perm_"));

        // Second ask reuses the same pending request.
        let again = exec
            .execute("r1", "u", "npm --version", "run `npm --version`")
            .await
            .unwrap();
        assert_eq!(again.request_id.unwrap(), request_id);
    }

    #[tokio::test]
    async fn unsafe_candidate_is_refused_without_execution() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let exec = ToolingExecutor::new(repo);
        let outcome = exec
            .execute("r1", "u", "cleanup", "- sudo rm -rf /tmp/x")
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::NeedsInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn granted_permission_runs_the_command() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let exec = ToolingExecutor::new(repo.clone());

        let mut perm = Permission::pending("u", "git", "execute", Some("tool"));
        perm.status = "active".to_string();
        repo.create_permission(&perm).await.unwrap();

        let outcome = exec
            .execute("r1", "u", "show the git version", "git --version")
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Completed);
        assert!(outcome.message.starts_with("Exit code: 0"));
    }
}
