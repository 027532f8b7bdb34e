use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;

use crate::core::paths::StatePaths;
use crate::core::repository::Repository;

const REQUESTS_PER_CHANNEL: usize = 20;

/// Collect the day's raw JSONL memory events, group them by channel, and
/// write a Markdown summary plus one durable summary row.
pub async fn build_daily_summary(
    repo: &Arc<Repository>,
    paths: &StatePaths,
    date: NaiveDate,
) -> Result<String> {
    let raw_dir = paths.memory_raw_dir(date);
    let mut by_channel: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if raw_dir.is_dir() {
        for entry in std::fs::read_dir(&raw_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "jsonl") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines() {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                    continue;
                };
                let channel = value
                    .get("channel")
                    .and_then(|c| c.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let request = value
                    .get("request")
                    .and_then(|r| r.as_str())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if !request.is_empty() {
                    by_channel.entry(channel).or_default().push(request);
                }
            }
        }
    }

    let date_str = date.format("%Y-%m-%d").to_string();
    let mut content = format!("# Daily summary — {date_str}\n\n");
    if by_channel.is_empty() {
        content.push_str("No activity recorded.\n");
    } else {
        for (channel, requests) in &by_channel {
            content.push_str(&format!("## {channel}\n\n"));
            let start = requests.len().saturating_sub(REQUESTS_PER_CHANNEL);
            for request in &requests[start..] {
                let mut line = request.replace('\n', " ");
                if line.chars().count() > 160 {
                    line = line.chars().take(160).collect::<String>() + "…";
                }
                content.push_str(&format!("- {line}\n"));
            }
            content.push('\n');
        }
    }

    let out_path = paths.memory_daily_dir().join(format!("{date_str}.md"));
    std::fs::write(&out_path, &content)?;
    repo.upsert_daily_summary(&date_str, &out_path.to_string_lossy(), &content)
        .await?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn summary_groups_by_channel_and_caps_requests() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());

        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let dir = paths.memory_raw_dir(date);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("whatsapp.jsonl")).unwrap();
        for i in 0..25 {
            writeln!(
                f,
                "{}",
                serde_json::json!({"channel": "whatsapp", "request": format!("request {i}")})
            )
            .unwrap();
        }

        let content = build_daily_summary(&repo, &paths, date).await.unwrap();
        assert!(content.contains("## whatsapp"));
        // Only the last 20 requests survive.
        assert!(!content.contains("request 4\n"));
        assert!(content.contains("request 24"));
        assert!(paths.memory_daily_dir().join("2025-06-01.md").is_file());
    }

    #[tokio::test]
    async fn empty_day_still_writes_a_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(tmp.path().to_path_buf()).unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());

        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let content = build_daily_summary(&repo, &paths, date).await.unwrap();
        assert!(content.contains("No activity recorded."));
    }
}
