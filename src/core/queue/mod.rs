mod envelope;

pub use envelope::MessageEnvelope;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, warn};

use crate::core::paths::StatePaths;
use crate::core::types::now_millis;

/// Directory-based message queue. All movement between `incoming/`,
/// `processing/` and `outgoing/` is a same-filesystem rename, so a file is
/// always in exactly one stage.
pub struct QueueSpooler {
    incoming: PathBuf,
    processing: PathBuf,
    outgoing: PathBuf,
    files: PathBuf,
}

impl QueueSpooler {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            incoming: paths.queue_incoming(),
            processing: paths.queue_processing(),
            outgoing: paths.queue_outgoing(),
            files: paths.files_dir(),
        }
    }

    /// Crash recovery: anything still in `processing/` belongs back in
    /// `incoming/` so it is retried.
    pub fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for entry in std::fs::read_dir(&self.processing)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                let target = self.incoming.join(entry.file_name());
                match std::fs::rename(entry.path(), &target) {
                    Ok(()) => recovered += 1,
                    Err(e) => warn!(
                        "Could not recover {}: {}",
                        entry.path().display(),
                        e
                    ),
                }
            }
        }
        if recovered > 0 {
            info!("Recovered {} message(s) from processing/", recovered);
        }
        Ok(recovered)
    }

    /// All `*.json` files in `incoming/` sorted by mtime (oldest first).
    pub fn list_incoming(&self) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.incoming)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push((path, mtime));
            }
        }
        entries.sort_by_key(|(_, mtime)| *mtime);
        Ok(entries.into_iter().map(|(path, _)| path).collect())
    }

    /// Read an envelope without claiming its file.
    pub fn peek(&self, path: &Path) -> Result<MessageEnvelope> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Claim a file by renaming it into `processing/`. The rename is the
    /// mutual-exclusion point; a failure leaves the file in `incoming/`
    /// for the next tick.
    pub fn claim(&self, incoming_path: &Path) -> Result<PathBuf> {
        let name = incoming_path
            .file_name()
            .context("queue file has no name")?;
        let target = self.processing.join(name);
        std::fs::rename(incoming_path, &target)
            .with_context(|| format!("claiming {}", incoming_path.display()))?;
        Ok(target)
    }

    /// Return a claimed file to `incoming/` (handler failure path).
    pub fn release(&self, processing_path: &Path) -> Result<()> {
        let name = processing_path
            .file_name()
            .context("queue file has no name")?;
        std::fs::rename(processing_path, self.incoming.join(name))
            .with_context(|| format!("releasing {}", processing_path.display()))?;
        Ok(())
    }

    /// Remove a fully handled file from `processing/`.
    pub fn complete(&self, processing_path: &Path) -> Result<()> {
        std::fs::remove_file(processing_path)
            .with_context(|| format!("completing {}", processing_path.display()))?;
        Ok(())
    }

    /// Write an outgoing envelope for the channel adapter to deliver.
    /// Heartbeat responses keep the bare `<messageId>.json` name the
    /// heartbeat poller expects.
    pub fn write_outgoing(&self, envelope: &MessageEnvelope) -> Result<PathBuf> {
        let name = if envelope.is_heartbeat() {
            format!("{}.json", envelope.message_id)
        } else {
            format!(
                "{}_{}_{}.json",
                envelope.channel,
                envelope.message_id,
                now_millis()
            )
        };
        let path = self.outgoing.join(name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(envelope)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Enqueue an internal (agent-to-agent) envelope back into `incoming/`.
    pub fn enqueue_internal(
        &self,
        envelope: &MessageEnvelope,
        conversation_id: &str,
        target_agent: &str,
    ) -> Result<PathBuf> {
        let rand_tag: u32 = rand::thread_rng().gen_range(0..0xffff);
        let name = format!(
            "internal_{}_{}_{}_{:04x}.json",
            conversation_id,
            target_agent,
            now_millis(),
            rand_tag
        );
        let path = self.incoming.join(name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(envelope)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Persist response spill / generated artifacts under the `files/` tree
    /// and return the absolute path.
    pub fn store_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.files.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn outgoing_dir(&self) -> &Path {
        &self.outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spooler() -> (tempfile::TempDir, QueueSpooler) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let spooler = QueueSpooler::new(&paths);
        (tmp, spooler)
    }

    fn envelope(message_id: &str, channel: &str) -> MessageEnvelope {
        MessageEnvelope {
            channel: channel.to_string(),
            sender: "t".to_string(),
            message: "hello".to_string(),
            timestamp: now_millis(),
            message_id: message_id.to_string(),
            sender_id: Some("u".to_string()),
            agent: None,
            files: vec![],
            conversation_id: None,
            from_agent: None,
            original_message: None,
        }
    }

    fn drop_incoming(spooler: &QueueSpooler, name: &str, env: &MessageEnvelope) -> PathBuf {
        let path = spooler.incoming.join(name);
        std::fs::write(&path, serde_json::to_string(env).unwrap()).unwrap();
        path
    }

    #[test]
    fn claim_moves_file_between_stages() {
        let (_tmp, spooler) = spooler();
        let env = envelope("m1", "whatsapp");
        let incoming = drop_incoming(&spooler, "whatsapp_m1.json", &env);

        let processing = spooler.claim(&incoming).unwrap();
        assert!(!incoming.exists());
        assert!(processing.exists());

        spooler.complete(&processing).unwrap();
        assert!(!processing.exists());
    }

    #[test]
    fn recover_returns_processing_files_to_incoming() {
        let (_tmp, spooler) = spooler();
        let env = envelope("m1", "whatsapp");
        for i in 0..3 {
            let name = format!("whatsapp_m{i}.json");
            let p = drop_incoming(&spooler, &name, &env);
            spooler.claim(&p).unwrap();
        }
        assert_eq!(spooler.list_incoming().unwrap().len(), 0);

        let recovered = spooler.recover().unwrap();
        assert_eq!(recovered, 3);
        assert_eq!(spooler.list_incoming().unwrap().len(), 3);
    }

    #[test]
    fn incoming_is_sorted_by_mtime() {
        let (_tmp, spooler) = spooler();
        let env = envelope("m", "whatsapp");
        let a = drop_incoming(&spooler, "a.json", &env);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let b = drop_incoming(&spooler, "b.json", &env);
        std::thread::sleep(std::time::Duration::from_millis(20));
        // Touch a again so it becomes the newest.
        std::fs::write(&a, serde_json::to_string(&env).unwrap()).unwrap();

        let listed = spooler.list_incoming().unwrap();
        assert_eq!(listed, vec![b, a]);
    }

    #[test]
    fn outgoing_names_encode_channel_except_heartbeat() {
        let (_tmp, spooler) = spooler();
        let path = spooler.write_outgoing(&envelope("m9", "whatsapp")).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("whatsapp_m9_"));
        assert!(name.ends_with(".json"));

        let hb = spooler.write_outgoing(&envelope("hb42", "heartbeat")).unwrap();
        assert_eq!(hb.file_name().unwrap().to_string_lossy(), "hb42.json");
    }

    #[test]
    fn internal_enqueue_lands_in_incoming() {
        let (_tmp, spooler) = spooler();
        let mut env = envelope("m1", "whatsapp");
        env.conversation_id = Some("conv1".to_string());
        env.from_agent = Some("alpha".to_string());

        let path = spooler.enqueue_internal(&env, "conv1", "beta").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("internal_conv1_beta_"));
        assert_eq!(spooler.list_incoming().unwrap().len(), 1);

        let peeked = spooler.peek(&path).unwrap();
        assert!(peeked.is_internal());
    }
}
