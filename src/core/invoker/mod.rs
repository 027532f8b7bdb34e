mod stream;

pub use stream::{parse_frame, FrameAccumulator, RunnerEvent};

use std::path::PathBuf;
use std::process::Stdio;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::paths::StatePaths;
use crate::core::settings::{AgentConfig, RunnerFamily};

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("model runner binary `{0}` was not found")]
    BinaryMissing(String),
    #[error("model `{0}` is unavailable")]
    ModelUnavailable(String),
    #[error("no prior session to resume")]
    NoPriorSession,
    #[error("model runner failed: {0}")]
    Subprocess(String),
}

/// Spawns the external model runner as an argv-only subprocess (never a
/// shell) inside the agent's workspace directory.
pub struct AgentInvoker {
    paths: StatePaths,
    model_unavailable_re: Regex,
    no_session_re: Regex,
}

impl AgentInvoker {
    pub fn new(paths: StatePaths) -> Self {
        Self {
            paths,
            model_unavailable_re: Regex::new(
                r"(?i)does not exist|do not have access|invalid model",
            )
            .unwrap(),
            no_session_re: Regex::new(r"(?i)no (prior |previous )?session|nothing to resume")
                .unwrap(),
        }
    }

    /// Run one model call and return the response text. Handles session
    /// resume fallback and model fallback internally; anything left is a
    /// structured error for the orchestrator to translate.
    pub async fn invoke(
        &self,
        agent: &AgentConfig,
        message: &str,
        resume: bool,
        team_note: Option<&str>,
    ) -> Result<String, InvokeError> {
        let workspace = self.prepare_workspace(agent, team_note)?;

        let primary = agent.runner.model.as_deref();
        match self.invoke_once(agent, message, resume, primary, &workspace).await {
            Err(InvokeError::NoPriorSession) if resume => {
                info!("Agent [{}]: no session to resume, starting fresh", agent.id);
                self.invoke_once(agent, message, false, primary, &workspace)
                    .await
            }
            Err(InvokeError::ModelUnavailable(model)) => {
                let Some(fallback) = agent.runner.fallback_model.as_deref() else {
                    return Err(InvokeError::ModelUnavailable(model));
                };
                warn!(
                    "Agent [{}]: model {} unavailable, falling back to {}",
                    agent.id, model, fallback
                );
                self.invoke_once(agent, message, false, Some(fallback), &workspace)
                    .await
            }
            other => other,
        }
    }

    fn prepare_workspace(
        &self,
        agent: &AgentConfig,
        team_note: Option<&str>,
    ) -> Result<PathBuf, InvokeError> {
        let workspace = self.paths.agent_workspace(&agent.id);
        std::fs::create_dir_all(&workspace)
            .map_err(|e| InvokeError::Subprocess(format!("workspace: {e}")))?;

        let note = team_note.unwrap_or("You are working alone on this request.");
        let context = format!(
            "# Teammate context\n\nYou are agent `{}`.\n\n{}\n",
            agent.id, note
        );
        std::fs::write(workspace.join("TEAM.md"), context)
            .map_err(|e| InvokeError::Subprocess(format!("team context: {e}")))?;
        Ok(workspace)
    }

    async fn invoke_once(
        &self,
        agent: &AgentConfig,
        message: &str,
        resume: bool,
        model: Option<&str>,
        workspace: &PathBuf,
    ) -> Result<String, InvokeError> {
        match agent.runner.family {
            RunnerFamily::Oneshot => {
                self.invoke_oneshot(agent, message, resume, model, workspace)
                    .await
            }
            RunnerFamily::Framed => {
                self.invoke_framed(agent, message, resume, model, workspace)
                    .await
            }
        }
    }

    /// Family A: one-shot CLI. Stdout is the response text.
    async fn invoke_oneshot(
        &self,
        agent: &AgentConfig,
        message: &str,
        resume: bool,
        model: Option<&str>,
        workspace: &PathBuf,
    ) -> Result<String, InvokeError> {
        let mut cmd = Command::new(&agent.runner.binary);
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        if resume {
            cmd.arg("--continue");
        }
        cmd.arg("-p").arg(message);
        cmd.current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| self.spawn_error(&agent.runner.binary, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(self.classify_failure(model, &stdout, &stderr));
        }
        if stdout.is_empty() {
            return Err(InvokeError::Subprocess("runner produced no output".to_string()));
        }
        Ok(stdout)
    }

    /// Family B: framed JSON event stream. The last `agent_message` wins;
    /// a trailing `error` frame fails the call.
    async fn invoke_framed(
        &self,
        agent: &AgentConfig,
        message: &str,
        resume: bool,
        model: Option<&str>,
        workspace: &PathBuf,
    ) -> Result<String, InvokeError> {
        let mut cmd = Command::new(&agent.runner.binary);
        if resume {
            cmd.arg("resume").arg("--last");
        } else {
            cmd.arg("exec");
        }
        cmd.arg("--json");
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg(message);
        cmd.current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.spawn_error(&agent.runner.binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokeError::Subprocess("runner stdout unavailable".to_string()))?;
        let mut stderr_pipe = child.stderr.take();

        let mut acc = FrameAccumulator::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            acc.push(&line);
        }

        let mut stderr = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| InvokeError::Subprocess(e.to_string()))?;

        match acc.finish() {
            Ok(text) if status.success() => Ok(text),
            Ok(text) => {
                // Exited non-zero after a final message; stderr decides.
                if stderr.trim().is_empty() {
                    Ok(text)
                } else {
                    Err(self.classify_failure(model, &text, &stderr))
                }
            }
            Err(frame_err) => Err(self.classify_failure(
                model,
                &frame_err,
                if stderr.trim().is_empty() { &frame_err } else { &stderr },
            )),
        }
    }

    fn spawn_error(&self, binary: &str, e: std::io::Error) -> InvokeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            InvokeError::BinaryMissing(binary.to_string())
        } else {
            InvokeError::Subprocess(e.to_string())
        }
    }

    fn classify_failure(&self, model: Option<&str>, stdout: &str, stderr: &str) -> InvokeError {
        let combined = format!("{stdout}\n{stderr}");
        if self.model_unavailable_re.is_match(&combined) {
            return InvokeError::ModelUnavailable(model.unwrap_or("default").to_string());
        }
        if self.no_session_re.is_match(&combined) {
            return InvokeError::NoPriorSession;
        }
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        InvokeError::Subprocess(truncate(detail.trim(), 400))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::RunnerConfig;

    fn test_invoker() -> (tempfile::TempDir, AgentInvoker) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        (tmp, AgentInvoker::new(paths))
    }

    fn script_agent(dir: &std::path::Path, script: &str) -> AgentConfig {
        let path = dir.join("fake_runner.sh");
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        AgentConfig {
            id: "default".to_string(),
            name: None,
            runner: RunnerConfig {
                family: RunnerFamily::Framed,
                binary: path.to_string_lossy().to_string(),
                model: None,
                fallback_model: None,
            },
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_structured_error() {
        let (_tmp, invoker) = test_invoker();
        let agent = AgentConfig {
            id: "default".to_string(),
            name: None,
            runner: RunnerConfig {
                family: RunnerFamily::Oneshot,
                binary: "/nonexistent/model-runner".to_string(),
                model: Some("m1".to_string()),
                fallback_model: None,
            },
        };
        let err = invoker.invoke(&agent, "hi", false, None).await.unwrap_err();
        assert!(matches!(err, InvokeError::BinaryMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn framed_stream_returns_last_agent_message() {
        let (tmp, invoker) = test_invoker();
        let agent = script_agent(
            tmp.path(),
            "#!/bin/sh\n\
             echo '{\"msg\":{\"type\":\"task_started\"}}'\n\
             echo '{\"msg\":{\"type\":\"agent_message\",\"text\":\"draft\"}}'\n\
             echo 'not json'\n\
             echo '{\"msg\":{\"type\":\"agent_message\",\"text\":\"final answer\"}}'\n",
        );
        let out = invoker.invoke(&agent, "hi", false, None).await.unwrap();
        assert_eq!(out, "final answer");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trailing_error_frame_fails_the_call() {
        let (tmp, invoker) = test_invoker();
        let agent = script_agent(
            tmp.path(),
            "#!/bin/sh\n\
             echo '{\"msg\":{\"type\":\"agent_message\",\"text\":\"partial\"}}'\n\
             echo '{\"msg\":{\"type\":\"error\",\"message\":\"backend exploded\"}}'\n",
        );
        let err = invoker.invoke(&agent, "hi", false, None).await.unwrap_err();
        assert!(matches!(err, InvokeError::Subprocess(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workspace_and_team_context_are_written() {
        let (tmp, invoker) = test_invoker();
        let agent = script_agent(
            tmp.path(),
            "#!/bin/sh\necho '{\"msg\":{\"type\":\"agent_message\",\"text\":\"ok\"}}'\n",
        );
        invoker
            .invoke(&agent, "hi", false, Some("You work with beta and gamma."))
            .await
            .unwrap();

        let team_md = invoker.paths.agent_workspace("default").join("TEAM.md");
        let contents = std::fs::read_to_string(team_md).unwrap();
        assert!(contents.contains("beta and gamma"));
    }
}
