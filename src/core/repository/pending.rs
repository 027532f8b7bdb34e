use anyhow::Result;
use rusqlite::params;

use super::Repository;
use crate::core::types::now_millis;

pub const DEFAULT_PENDING_TTL_MS: i64 = 10 * 60 * 1000;

/// Durable hand-off record so a channel adapter can still reply after the
/// process (and its in-memory handle map) restarted.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_id: Option<String>,
    pub chat_ref: Option<String>,
    pub reply_ref: Option<String>,
    pub expires_at: i64,
}

impl Repository {
    pub async fn remember_pending(&self, msg: &PendingMessage) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO pending_messages (message_id, channel, sender, sender_id,
                chat_ref, reply_ref, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (message_id) DO UPDATE SET
                chat_ref = excluded.chat_ref,
                reply_ref = excluded.reply_ref,
                expires_at = excluded.expires_at",
            params![
                msg.message_id,
                msg.channel,
                msg.sender,
                msg.sender_id,
                msg.chat_ref,
                msg.reply_ref,
                msg.expires_at,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    /// Expired rows are invisible to readers even before cleanup runs.
    pub async fn read_pending(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<Option<PendingMessage>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare(
            "SELECT message_id, channel, sender, sender_id, chat_ref, reply_ref, expires_at
             FROM pending_messages
             WHERE channel = ?1 AND message_id = ?2 AND expires_at >= ?3",
        )?;
        let mut rows = stmt.query_map(params![channel, message_id, now_millis()], |row| {
            Ok(PendingMessage {
                message_id: row.get(0)?,
                channel: row.get(1)?,
                sender: row.get(2)?,
                sender_id: row.get(3)?,
                chat_ref: row.get(4)?,
                reply_ref: row.get(5)?,
                expires_at: row.get(6)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn clear_pending(&self, message_id: &str) -> Result<()> {
        let db = self.conn.lock().await;
        db.execute(
            "DELETE FROM pending_messages WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(())
    }

    /// Idempotent purge of expired rows. Returns the number removed.
    pub async fn purge_expired_pending(&self) -> Result<usize> {
        let db = self.conn.lock().await;
        let n = db.execute(
            "DELETE FROM pending_messages WHERE expires_at < ?1",
            params![now_millis()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(message_id: &str, ttl_ms: i64) -> PendingMessage {
        PendingMessage {
            message_id: message_id.to_string(),
            channel: "whatsapp".to_string(),
            sender: "t".to_string(),
            sender_id: Some("123".to_string()),
            chat_ref: Some("123@c.us".to_string()),
            reply_ref: Some("abc".to_string()),
            expires_at: now_millis() + ttl_ms,
        }
    }

    #[tokio::test]
    async fn remember_read_clear_round_trip() {
        let repo = Repository::open_in_memory().unwrap();
        repo.remember_pending(&pending("m", 60_000)).await.unwrap();

        let row = repo.read_pending("whatsapp", "m").await.unwrap().unwrap();
        assert_eq!(row.chat_ref.as_deref(), Some("123@c.us"));
        assert_eq!(row.reply_ref.as_deref(), Some("abc"));

        repo.clear_pending("m").await.unwrap();
        assert!(repo.read_pending("whatsapp", "m").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_rows_are_hidden_and_purged() {
        let repo = Repository::open_in_memory().unwrap();
        repo.remember_pending(&pending("gone", -1)).await.unwrap();
        repo.remember_pending(&pending("live", 60_000)).await.unwrap();

        assert!(repo.read_pending("whatsapp", "gone").await.unwrap().is_none());
        assert!(repo.read_pending("whatsapp", "live").await.unwrap().is_some());

        assert_eq!(repo.purge_expired_pending().await.unwrap(), 1);
        // Cleanup is idempotent.
        assert_eq!(repo.purge_expired_pending().await.unwrap(), 0);
    }
}
