use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::core::paths::StatePaths;

/// Top-level `settings.json` model. Unknown keys are preserved-by-ignore:
/// readers tolerate extra fields, writers emit the full structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub harness: HarnessSettings,
    pub channels: ChannelsSettings,
    pub agents: Vec<AgentConfig>,
    pub teams: Vec<TeamConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            harness: HarnessSettings::default(),
            channels: ChannelsSettings::default(),
            agents: vec![AgentConfig {
                id: "default".to_string(),
                name: None,
                runner: RunnerConfig::default(),
            }],
            teams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub enabled: bool,
    pub autonomy: String,
    pub quiet_hours: Option<QuietHoursConfig>,
    pub digest_time: Option<String>,
    pub browser: BrowserSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            autonomy: "normal".to_string(),
            quiet_hours: None,
            digest_time: None,
            browser: BrowserSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    /// `HH:MM` local time, inclusive.
    pub start: String,
    /// `HH:MM` local time, exclusive. May be earlier than `start`
    /// (wrap-around window).
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enabled: bool,
    /// `auto` | `cdp` | `broker`
    pub provider: String,
    pub profile_path: Option<String>,
    pub profile_directory: Option<String>,
    pub debugger_url: Option<String>,
    pub debugger_ports: Vec<u16>,
    /// Command line of the external automation broker (stdio JSON-RPC).
    pub mcp_channel: Option<String>,
    pub open_domain_access: bool,
    pub hard_stop_payments: bool,
    pub use_claude_chrome: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "auto".to_string(),
            profile_path: None,
            profile_directory: Some("Default".to_string()),
            debugger_url: None,
            debugger_ports: vec![9222],
            mcp_channel: None,
            open_domain_access: false,
            hard_stop_payments: true,
            use_claude_chrome: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsSettings {
    pub whatsapp: WhatsAppSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSettings {
    pub self_command_only: bool,
    pub self_command_prefix: String,
    pub require_self_chat: bool,
}

impl Default for WhatsAppSettings {
    fn default() -> Self {
        Self {
            self_command_only: false,
            self_command_prefix: "/".to_string(),
            require_self_chat: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl AgentConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Which subprocess wire contract the agent's model runner speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerFamily {
    /// One-shot CLI: `--model <m> [--continue] -p <message>`, response on stdout.
    Oneshot,
    /// Framed JSONL event stream: `exec --json`, last agent_message wins.
    Framed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub family: RunnerFamily,
    pub binary: String,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            family: RunnerFamily::Framed,
            binary: "claude".to_string(),
            model: None,
            fallback_model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub leader: String,
    pub members: Vec<String>,
}

impl Settings {
    pub fn load(paths: &StatePaths) -> Result<Self> {
        let file = paths.settings_file();
        if !file.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", file.display()))?;
        Ok(settings)
    }

    /// Atomic write: tmp file + same-directory rename so readers never see
    /// a partial JSON document.
    pub fn save(&self, paths: &StatePaths) -> Result<()> {
        let file = paths.settings_file();
        let tmp = file.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &file).with_context(|| format!("renaming into {}", file.display()))?;
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn default_agent(&self) -> Option<&AgentConfig> {
        self.agent("default").or_else(|| self.agents.first())
    }

    /// First agent whose runner binary looks like a Claude-family CLI.
    /// Used for the `use_claude_chrome` browser override.
    pub fn claude_agent(&self) -> Option<&AgentConfig> {
        self.agents
            .iter()
            .find(|a| a.runner.binary.contains("claude"))
    }

    pub fn quiet_hours(&self) -> Option<QuietHours> {
        let cfg = self.harness.quiet_hours.as_ref()?;
        QuietHours::parse(&cfg.start, &cfg.end)
    }
}

/// Parsed wrap-around daily window `[start, end)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            // Wraps past midnight, e.g. 22:00 - 07:00.
            t >= self.start || t < self.end
        }
    }
}
