mod daily;
mod extract;

pub use daily::build_daily_summary;
pub use extract::{ExtractedFact, Extractor};

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::paths::StatePaths;
use crate::core::repository::{MemoryRecord, Repository};
use crate::core::types::now_millis;

const RETRIEVE_DEFAULT: usize = 12;
const RETRIEVE_CAP: usize = 20;

/// Extracts durable user facts from conversation text and serves them back
/// as context for new objectives.
pub struct MemoryService {
    repo: Arc<Repository>,
    paths: StatePaths,
    extractor: Extractor,
}

impl MemoryService {
    pub fn new(repo: Arc<Repository>, paths: StatePaths) -> Self {
        Self {
            repo,
            paths,
            extractor: Extractor::new(),
        }
    }

    /// Ingest facts from (objective, output) text. Returns how many records
    /// were written. Each ingest also lands in the raw JSONL stream.
    pub async fn ingest(
        &self,
        user_id: &str,
        run_id: &str,
        channel: &str,
        text: &str,
    ) -> Result<usize> {
        let facts = self.extractor.extract(text);
        if facts.is_empty() {
            return Ok(0);
        }

        for fact in &facts {
            let record = MemoryRecord {
                record_id: stable_record_id(user_id, fact.category, &fact.key),
                user_id: user_id.to_string(),
                category: fact.category.to_string(),
                key: fact.key.clone(),
                value: fact.value.clone(),
                confidence: fact.confidence,
                source_run_id: Some(run_id.to_string()),
                created_at: 0,
                updated_at: 0,
            };
            self.repo.upsert_memory(&record).await?;
        }

        self.append_raw_event(channel, user_id, run_id, text)?;
        self.repo
            .record_event(
                run_id,
                "memory_ingested",
                &serde_json::json!({
                    "userId": user_id,
                    "count": facts.len(),
                    "categories": facts.iter().map(|f| f.category).collect::<Vec<_>>(),
                }),
            )
            .await?;
        self.repo
            .increment_metric("memory_records_ingested", facts.len() as f64, None)
            .await?;
        info!("Memory: ingested {} fact(s) for {}", facts.len(), user_id);
        Ok(facts.len())
    }

    /// Score stored records against the objective and render the top hits
    /// as a context block, or None when nothing is relevant.
    pub async fn retrieve_context(&self, user_id: &str, objective: &str) -> Result<Option<String>> {
        let records = self.repo.list_memory(user_id, None).await?;
        if records.is_empty() {
            return Ok(None);
        }

        let query_tokens = tokenize(objective);
        let mut scored: Vec<(f64, &MemoryRecord)> = records
            .iter()
            .map(|rec| {
                let rec_tokens = tokenize(&format!("{} {}", rec.key, rec.value));
                let hits = query_tokens
                    .iter()
                    .filter(|t| rec_tokens.contains(*t))
                    .count() as f64;
                let score = 2.0 * hits + rec.confidence + rec.updated_at as f64 / 1e13;
                (score, rec)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let top: Vec<&(f64, &MemoryRecord)> = scored
            .iter()
            .take(RETRIEVE_DEFAULT.min(RETRIEVE_CAP))
            .collect();
        if top.is_empty() {
            return Ok(None);
        }

        let mut block = String::from("Relevant memory for this request:\n");
        for (_, rec) in top {
            block.push_str(&format!(
                "- [{}] {}: {} (confidence {:.2})\n",
                rec.category, rec.key, rec.value, rec.confidence
            ));
        }
        Ok(Some(block))
    }

    /// Append to `memory/raw/YYYY/MM/DD/<channel>.jsonl`.
    fn append_raw_event(
        &self,
        channel: &str,
        user_id: &str,
        run_id: &str,
        text: &str,
    ) -> Result<()> {
        let date = chrono::Utc::now().date_naive();
        let dir = self.paths.memory_raw_dir(date);
        std::fs::create_dir_all(&dir)?;
        let line = serde_json::json!({
            "ts": now_millis(),
            "channel": channel,
            "userId": user_id,
            "runId": run_id,
            "request": text,
        });
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{channel}.jsonl")))?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

/// Deterministic id so repeated ingest of the same (user, category, key)
/// lands on the same row.
pub fn stable_record_id(user_id: &str, category: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{user_id}|{category}|{key}"));
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("mem_{hex}")
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (tempfile::TempDir, MemoryService) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        (tmp, MemoryService::new(repo, paths))
    }

    #[tokio::test]
    async fn ingest_then_retrieve_round_trip() {
        let (_tmp, svc) = service().await;
        let n = svc
            .ingest(
                "u",
                "r1",
                "whatsapp",
                "I prefer concise bullet updates. Remember this preference.",
            )
            .await
            .unwrap();
        assert!(n >= 1);

        let context = svc
            .retrieve_context("u", "please keep updates concise")
            .await
            .unwrap()
            .unwrap();
        assert!(context.contains("concise"));
        assert!(context.contains("[preferences]"));
    }

    #[tokio::test]
    async fn repeated_ingest_is_idempotent() {
        let (_tmp, svc) = service().await;
        let text = "I prefer tea. Remember that the demo is Friday.";
        svc.ingest("u", "r1", "cli", text).await.unwrap();
        svc.ingest("u", "r2", "cli", text).await.unwrap();

        let rows = svc.repo.list_memory("u", None).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| (&r.category, &r.key)).collect();
        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys.len(), deduped.len(), "no duplicate rows after re-ingest");
    }

    #[tokio::test]
    async fn raw_jsonl_stream_is_appended() {
        let (_tmp, svc) = service().await;
        svc.ingest("u", "r1", "telegram", "I prefer short answers")
            .await
            .unwrap();

        let date = chrono::Utc::now().date_naive();
        let file = svc.paths.memory_raw_dir(date).join("telegram.jsonl");
        let raw = std::fs::read_to_string(file).unwrap();
        assert!(raw.lines().count() >= 1);
        assert!(raw.contains("short answers"));
    }

    #[test]
    fn record_ids_are_stable() {
        let a = stable_record_id("u", "preferences", "tea");
        let b = stable_record_id("u", "preferences", "tea");
        let c = stable_record_id("u", "preferences", "coffee");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
