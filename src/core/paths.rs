use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

const CANONICAL_DIR: &str = ".tinyagi";
const LEGACY_DIR: &str = ".tinyclaw";

/// Resolved state home. All on-disk paths derive from this one root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Resolve the state home once at startup.
    ///
    /// Order: `TINYAGI_DATA_DIR` env override, a dot-directory sitting next
    /// to the binary, then `~/.tinyagi` (migrating `~/.tinyclaw` if that is
    /// all that exists).
    pub fn resolve() -> Result<Self> {
        if let Ok(dir) = std::env::var("TINYAGI_DATA_DIR") {
            if !dir.trim().is_empty() {
                return Self::at(PathBuf::from(dir));
            }
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(exe_dir) = exe.parent() {
                let local = exe_dir.join(CANONICAL_DIR);
                if local.is_dir() {
                    return Self::at(local);
                }
                let local_legacy = exe_dir.join(LEGACY_DIR);
                if local_legacy.is_dir() {
                    return Self::at(local_legacy);
                }
            }
        }

        let home = dirs::home_dir().context("could not determine home directory")?;
        let canonical = home.join(CANONICAL_DIR);
        let legacy = home.join(LEGACY_DIR);

        if !canonical.exists() && legacy.is_dir() && !legacy.is_symlink() {
            migrate_legacy(&legacy, &canonical)?;
        }

        Self::at(canonical)
    }

    /// Use an explicit root (tests inject a temp directory here).
    pub fn at(root: PathBuf) -> Result<Self> {
        let paths = Self { root };
        paths.ensure_layout()?;
        Ok(paths)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.queue_incoming(),
            self.queue_processing(),
            self.queue_outgoing(),
            self.logs_dir(),
            self.events_dir(),
            self.files_dir(),
            self.chats_root(),
            self.harness_dir(),
            self.memory_raw_root(),
            self.memory_daily_dir(),
            self.skills_root(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_incoming(&self) -> PathBuf {
        self.root.join("queue").join("incoming")
    }

    pub fn queue_processing(&self) -> PathBuf {
        self.root.join("queue").join("processing")
    }

    pub fn queue_outgoing(&self) -> PathBuf {
        self.root.join("queue").join("outgoing")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn chats_root(&self) -> PathBuf {
        self.root.join("chats")
    }

    pub fn chats_dir(&self, team_id: &str) -> PathBuf {
        self.chats_root().join(team_id)
    }

    pub fn harness_dir(&self) -> PathBuf {
        self.root.join("harness")
    }

    pub fn state_db(&self) -> PathBuf {
        self.harness_dir().join("state.db")
    }

    pub fn deferred_outbox(&self) -> PathBuf {
        self.harness_dir().join("proactive-deferred.jsonl")
    }

    pub fn proactive_state(&self) -> PathBuf {
        self.harness_dir().join("proactive-state.json")
    }

    pub fn browser_audit_dir(&self, run_id: &str, tab_id: &str) -> PathBuf {
        self.harness_dir()
            .join("browser-audit")
            .join(run_id)
            .join(tab_id)
    }

    pub fn browser_profile_mirror(&self) -> PathBuf {
        self.harness_dir().join("browser-profile-mirror")
    }

    pub fn memory_raw_root(&self) -> PathBuf {
        self.root.join("memory").join("raw")
    }

    /// `memory/raw/YYYY/MM/DD` for the given UTC date.
    pub fn memory_raw_dir(&self, date: chrono::NaiveDate) -> PathBuf {
        self.memory_raw_root()
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
    }

    pub fn memory_daily_dir(&self) -> PathBuf {
        self.root.join("memory").join("daily")
    }

    pub fn skills_root(&self) -> PathBuf {
        self.root.join("skills")
    }

    pub fn skill_dir(&self, skill_id: &str) -> PathBuf {
        self.skills_root().join(skill_id)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn agent_workspace(&self, agent_id: &str) -> PathBuf {
        self.root.join("agents").join(agent_id)
    }
}

/// One-time migration from the legacy dot-directory: full copy, parity
/// check by file count, then the legacy dir is swapped for a symlink when
/// the platform allows it.
fn migrate_legacy(legacy: &Path, canonical: &Path) -> Result<()> {
    info!(
        "Migrating state home {} -> {}",
        legacy.display(),
        canonical.display()
    );
    copy_tree(legacy, canonical)?;

    let src_count = count_files(legacy);
    let dst_count = count_files(canonical);
    if dst_count < src_count {
        anyhow::bail!(
            "state migration incomplete: copied {} of {} files",
            dst_count,
            src_count
        );
    }

    let backup = legacy.with_extension("migrated");
    if let Err(e) = fs::rename(legacy, &backup) {
        warn!("Could not move legacy state dir aside: {}", e);
        return Ok(());
    }
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(canonical, legacy).is_err() {
            warn!("Could not leave compatibility symlink at {}", legacy.display());
        }
    }
    let _ = backup; // kept on disk as a safety copy
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if ty.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn count_files(root: &Path) -> usize {
    let mut n = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(ty) if ty.is_dir() => stack.push(entry.path()),
                Ok(ty) if ty.is_file() => n += 1,
                _ => {}
            }
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_created_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().join("state")).unwrap();
        assert!(paths.queue_incoming().is_dir());
        assert!(paths.queue_processing().is_dir());
        assert!(paths.queue_outgoing().is_dir());
        assert!(paths.harness_dir().is_dir());
        assert!(paths.memory_daily_dir().is_dir());
    }

    #[test]
    fn legacy_migration_copies_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy = tmp.path().join(".tinyclaw");
        fs::create_dir_all(legacy.join("queue/incoming")).unwrap();
        fs::write(legacy.join("settings.json"), "{}").unwrap();
        fs::write(legacy.join("queue/incoming/a.json"), "{}").unwrap();

        let canonical = tmp.path().join(".tinyagi");
        migrate_legacy(&legacy, &canonical).unwrap();

        assert!(canonical.join("settings.json").is_file());
        assert!(canonical.join("queue/incoming/a.json").is_file());
    }

    #[test]
    fn raw_memory_dir_uses_utc_date_components() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let dir = paths.memory_raw_dir(date);
        assert!(dir.ends_with("memory/raw/2025/03/07"));
    }
}
