//! Message persistence behind a storage trait.
//!
//! Everything the engine persists goes through [`HistoryStore`]; the
//! in-memory store backs tests and short-lived bots, the JSONL store gives a
//! durable append-only log with one record per line.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_command::HistoryRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Storage for dispatched messages, queried back by handler history lookups.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, record: HistoryRecord) -> Result<()>;

    /// Records matching the given channel name and/or user id filters, in
    /// insertion order. `None` filters match everything.
    async fn query(&self, channel: Option<&str>, user: Option<&str>) -> Result<Vec<HistoryRecord>>;

    /// Discards all stored records. Runs before a history backfill so the
    /// store never holds duplicates of re-fetched messages.
    async fn clear(&self) -> Result<()>;
}

fn matches(record: &HistoryRecord, channel: Option<&str>, user: Option<&str>) -> bool {
    channel.is_none_or(|name| record.channel_name == name)
        && user.is_none_or(|id| record.user_id == id)
}

/// Volatile store. Duplicate timestamps are dropped on insert.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn record(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("history store lock poisoned"))?;
        if records.iter().any(|existing| existing.timestamp == record.timestamp) {
            return Ok(());
        }
        records.push(record);
        Ok(())
    }

    async fn query(&self, channel: Option<&str>, user: Option<&str>) -> Result<Vec<HistoryRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("history store lock poisoned"))?;
        Ok(records
            .iter()
            .filter(|record| matches(record, channel, user))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("history store lock poisoned"))?
            .clear();
        Ok(())
    }
}

/// Append-only JSONL file, one serialized record per line.
pub struct JsonlHistoryStore {
    path: PathBuf,
    // Serializes writers; reads go through the filesystem.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn record(&self, record: HistoryRecord) -> Result<()> {
        let line = serde_json::to_string(&record).context("serialize history record")?;
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open history log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await.context("append history record")?;
        file.write_all(b"\n").await.context("append history record")?;
        Ok(())
    }

    async fn query(&self, channel: Option<&str>, user: Option<&str>) -> Result<Vec<HistoryRecord>> {
        let _guard = self.write_lock.lock().await;
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("read history log {}", self.path.display()))
            }
        };
        let mut records = Vec::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let record: HistoryRecord =
                serde_json::from_str(line).context("decode history record")?;
            if matches(&record, channel, user) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("clear history log {}", self.path.display()))
            }
        }
    }
}

/// Whether a message belongs in the store: not the bot's own, not empty, and
/// not an invocation of the bot.
pub(crate) fn persist_eligible(text: &str, user: &str, bot_user_id: &str, alert: &str) -> bool {
    user != bot_user_id && !text.is_empty() && !text.trim_start().starts_with(alert)
}

#[cfg(test)]
mod tests {
    use parley_command::HistoryRecord;

    use super::{persist_eligible, HistoryStore, JsonlHistoryStore, MemoryHistoryStore};

    fn record(ts: &str, channel: &str, user: &str) -> HistoryRecord {
        HistoryRecord {
            user_id: user.to_string(),
            channel_name: channel.to_string(),
            text: "hello".to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[tokio::test]
    async fn unit_memory_store_filters_by_channel_and_user() {
        let store = MemoryHistoryStore::new();
        store.record(record("1.0", "general", "U1")).await.expect("record");
        store.record(record("2.0", "general", "U2")).await.expect("record");
        store.record(record("3.0", "ops", "U1")).await.expect("record");

        let general = store.query(Some("general"), None).await.expect("query");
        assert_eq!(general.len(), 2);
        let u1_general = store.query(Some("general"), Some("U1")).await.expect("query");
        assert_eq!(u1_general.len(), 1);
        assert_eq!(u1_general[0].timestamp, "1.0");
        let all = store.query(None, None).await.expect("query");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn unit_memory_store_drops_duplicate_timestamps() {
        let store = MemoryHistoryStore::new();
        store.record(record("1.0", "general", "U1")).await.expect("record");
        store.record(record("1.0", "general", "U1")).await.expect("record");
        assert_eq!(store.query(None, None).await.expect("query").len(), 1);
    }

    #[tokio::test]
    async fn unit_jsonl_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlHistoryStore::new(dir.path().join("history.jsonl"));
        store.record(record("1.0", "general", "U1")).await.expect("record");
        store.record(record("2.0", "ops", "U2")).await.expect("record");

        let all = store.query(None, None).await.expect("query");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id, "U1");
        let ops = store.query(Some("ops"), None).await.expect("query");
        assert_eq!(ops.len(), 1);

        store.clear().await.expect("clear");
        assert!(store.query(None, None).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn unit_jsonl_store_queries_empty_before_first_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlHistoryStore::new(dir.path().join("missing.jsonl"));
        assert!(store.query(None, None).await.expect("query").is_empty());
        store.clear().await.expect("clear is a no-op");
    }

    #[test]
    fn unit_persistence_skips_own_empty_and_invoking_messages() {
        assert!(persist_eligible("hello there", "U1", "UBOT", "!"));
        assert!(!persist_eligible("hello there", "UBOT", "UBOT", "!"));
        assert!(!persist_eligible("", "U1", "UBOT", "!"));
        assert!(!persist_eligible("!greet ada", "U1", "UBOT", "!"));
        assert!(!persist_eligible("  !greet ada", "U1", "UBOT", "!"));
    }
}
