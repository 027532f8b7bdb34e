use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::broker::BrokerDriver;
use super::cdp::CdpDriver;
use super::driver::BrowserDriver;
use crate::core::paths::StatePaths;
use crate::core::repository::{BrowserSession, Repository};
use crate::core::settings::BrowserSettings;
use crate::core::types::now_millis;

const DEBUGGER_READY_TIMEOUT: Duration = Duration::from_secs(12);
const MIRROR_MAX_AGE: Duration = Duration::from_secs(120);
const PORT_RANGE: std::ops::RangeInclusive<u16> = 9222..=9621;

/// Profile subdirectories excluded from the mirror snapshot.
const MIRROR_EXCLUDES: &[&str] = &[
    "Cache",
    "Code Cache",
    "GPUCache",
    "ShaderCache",
    "GrShaderCache",
    "DawnCache",
    "Media Cache",
];

/// A connected step-level driver plus the session row it runs under.
pub struct SessionHandle {
    pub driver: Box<dyn BrowserDriver>,
    pub session_id: String,
}

/// Connect per the configured provider. `auto` tries the direct debugger
/// first and falls back to the broker on the known unrecoverable attach
/// failures.
pub async fn connect(
    settings: &BrowserSettings,
    repo: &Arc<Repository>,
    paths: &StatePaths,
) -> Result<SessionHandle> {
    match settings.provider.as_str() {
        "cdp" => connect_cdp(settings, repo, paths).await,
        "broker" => connect_broker(settings).await,
        _ => match connect_cdp(settings, repo, paths).await {
            Ok(handle) => Ok(handle),
            Err(e) if is_attach_failure(&e) => {
                warn!("Debugger attach failed ({:#}); trying broker", e);
                connect_broker(settings).await
            }
            Err(e) => Err(e),
        },
    }
}

fn is_attach_failure(e: &anyhow::Error) -> bool {
    let text = format!("{e:#}").to_lowercase();
    text.contains("no reachable debugger")
        || text.contains("profile lock")
        || text.contains("will not relaunch chrome")
        || text.contains("debugger did not become ready")
}

async fn connect_broker(settings: &BrowserSettings) -> Result<SessionHandle> {
    let command = settings
        .mcp_channel
        .as_deref()
        .ok_or_else(|| anyhow!("no automation broker configured (harness.browser.mcp_channel)"))?;
    let driver = BrokerDriver::spawn(command).await?;
    Ok(SessionHandle {
        driver: Box::new(driver),
        session_id: format!("bsess_{}", uuid::Uuid::new_v4().simple()),
    })
}

async fn connect_cdp(
    settings: &BrowserSettings,
    repo: &Arc<Repository>,
    paths: &StatePaths,
) -> Result<SessionHandle> {
    let (http_base, port) = locate_debugger(settings, repo, paths).await?;
    let driver = CdpDriver::connect(&http_base).await?;

    let session_id = format!("bsess_{}", uuid::Uuid::new_v4().simple());
    repo.upsert_browser_session(&BrowserSession {
        session_id: session_id.clone(),
        host: "127.0.0.1".to_string(),
        port,
        profile_path: settings.profile_path.clone(),
        status: "active".to_string(),
        created_at: now_millis(),
        updated_at: now_millis(),
    })
    .await?;

    Ok(SessionHandle {
        driver: Box::new(driver),
        session_id,
    })
}

/// Find a live debugger: explicit URL, configured ports, known-active
/// sessions for the preferred profile, then a fresh launch against the
/// mirrored profile snapshot.
async fn locate_debugger(
    settings: &BrowserSettings,
    repo: &Arc<Repository>,
    paths: &StatePaths,
) -> Result<(String, u16)> {
    if let Some(url) = settings.debugger_url.as_deref() {
        let base = url.trim_end_matches('/').to_string();
        if probe_debugger(&base).await {
            let port = base.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(0);
            return Ok((base, port));
        }
    }

    for port in &settings.debugger_ports {
        let base = format!("http://127.0.0.1:{port}");
        if probe_debugger(&base).await {
            return Ok((base, *port));
        }
    }

    if let Some(profile) = settings.profile_path.as_deref() {
        for session in repo.find_active_sessions_for_profile(profile).await? {
            let base = format!("http://{}:{}", session.host, session.port);
            if probe_debugger(&base).await {
                return Ok((base, session.port));
            }
            repo.set_browser_session_status(&session.session_id, "stale")
                .await?;
        }
    }

    launch_browser(settings, paths).await
}

async fn probe_debugger(http_base: &str) -> bool {
    reqwest::Client::new()
        .get(format!("{http_base}/json/version"))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// Launch Chrome against the mirrored profile on a random debug port and
/// wait for the debugger to come up.
async fn launch_browser(
    settings: &BrowserSettings,
    paths: &StatePaths,
) -> Result<(String, u16)> {
    let user_data_dir = match settings.profile_path.as_deref() {
        Some(source) => prepare_profile_mirror(
            paths,
            Path::new(source),
            settings.profile_directory.as_deref().unwrap_or("Default"),
        )?,
        None => {
            let dir = paths.browser_profile_mirror();
            std::fs::create_dir_all(&dir)?;
            dir
        }
    };

    let port: u16 = rand::thread_rng().gen_range(PORT_RANGE);
    let binary = find_browser_binary()
        .ok_or_else(|| anyhow!("no reachable debugger and no chrome binary found"))?;

    info!(
        "Launching {} with mirrored profile on port {}",
        binary, port
    );
    // Dropping the handle detaches; the launched browser keeps running.
    let _child = tokio::process::Command::new(&binary)
        .arg(format!("--remote-debugging-port={port}"))
        .arg(format!("--user-data-dir={}", user_data_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("launching {binary}"))?;

    let base = format!("http://127.0.0.1:{port}");
    let deadline = tokio::time::Instant::now() + DEBUGGER_READY_TIMEOUT;
    loop {
        if probe_debugger(&base).await {
            return Ok((base, port));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("debugger did not become ready on port {port}"));
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
}

fn find_browser_binary() -> Option<String> {
    let candidates = [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];
    for candidate in candidates {
        if candidate.starts_with('/') {
            if Path::new(candidate).exists() {
                return Some(candidate.to_string());
            }
            continue;
        }
        let found = std::process::Command::new("which")
            .arg(candidate)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if found {
            return Some(candidate.to_string());
        }
    }
    None
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct MirrorMeta {
    source: String,
    profile: String,
    prepared_at: i64,
}

/// Snapshot the user-data directory (minus caches) so Chrome can run
/// against it while the real profile stays locked by the user's browser.
/// The metadata file makes the snapshot a write-through cache: re-checks
/// are cheap and concurrent runs share one mirror.
pub fn prepare_profile_mirror(
    paths: &StatePaths,
    source: &Path,
    profile_directory: &str,
) -> Result<PathBuf> {
    let mirror = paths.browser_profile_mirror();
    let meta_path = mirror.join("mirror-meta.json");

    if let Ok(raw) = std::fs::read_to_string(&meta_path) {
        if let Ok(meta) = serde_json::from_str::<MirrorMeta>(&raw) {
            let age = now_millis() - meta.prepared_at;
            let fresh = age >= 0 && (age as u128) < MIRROR_MAX_AGE.as_millis();
            if fresh
                && meta.source == source.to_string_lossy()
                && meta.profile == profile_directory
            {
                return Ok(mirror);
            }
        }
    }

    info!(
        "Refreshing browser profile mirror from {}",
        source.display()
    );
    std::fs::create_dir_all(&mirror)?;
    if source.is_dir() {
        copy_profile_tree(source, &mirror)?;
    }

    let meta = MirrorMeta {
        source: source.to_string_lossy().to_string(),
        profile: profile_directory.to_string(),
        prepared_at: now_millis(),
    };
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;
    Ok(mirror)
}

fn copy_profile_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if MIRROR_EXCLUDES.iter().any(|e| *e == name_str) {
            continue;
        }
        // Chrome's own lock files must not be mirrored.
        if name_str.starts_with("Singleton") {
            continue;
        }
        let target = dst.join(&name);
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_profile_tree(&entry.path(), &target)?;
        } else if ty.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_excludes_cache_dirs_and_locks() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().join("state")).unwrap();

        let source = tmp.path().join("chrome-profile");
        std::fs::create_dir_all(source.join("Default")).unwrap();
        std::fs::create_dir_all(source.join("Cache")).unwrap();
        std::fs::create_dir_all(source.join("GPUCache")).unwrap();
        std::fs::write(source.join("Default/Preferences"), "{}").unwrap();
        std::fs::write(source.join("Cache/blob"), "x").unwrap();
        std::fs::write(source.join("SingletonLock"), "").unwrap();

        let mirror = prepare_profile_mirror(&paths, &source, "Default").unwrap();
        assert!(mirror.join("Default/Preferences").is_file());
        assert!(!mirror.join("Cache").exists());
        assert!(!mirror.join("GPUCache").exists());
        assert!(!mirror.join("SingletonLock").exists());
        assert!(mirror.join("mirror-meta.json").is_file());
    }

    #[test]
    fn fresh_mirror_is_reused_without_copying() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().join("state")).unwrap();
        let source = tmp.path().join("chrome-profile");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("Local State"), "{}").unwrap();

        let first = prepare_profile_mirror(&paths, &source, "Default").unwrap();
        // New file in source; a fresh mirror skips the re-copy so it must
        // not appear yet.
        std::fs::write(source.join("Bookmarks"), "{}").unwrap();
        let second = prepare_profile_mirror(&paths, &source, "Default").unwrap();
        assert_eq!(first, second);
        assert!(!second.join("Bookmarks").exists());
    }

    #[test]
    fn profile_change_forces_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().join("state")).unwrap();
        let source = tmp.path().join("chrome-profile");
        std::fs::create_dir_all(&source).unwrap();

        prepare_profile_mirror(&paths, &source, "Default").unwrap();
        std::fs::write(source.join("Bookmarks"), "{}").unwrap();
        let mirror = prepare_profile_mirror(&paths, &source, "Profile 2").unwrap();
        assert!(mirror.join("Bookmarks").exists());
    }
}
