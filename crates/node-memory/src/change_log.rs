use std::sync::Arc;

use async_trait::async_trait;
use dynconf_nomad::{ChangeLog, ChangeRecord, LoggedRecord, content_hash};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ChangeLogError;

/// In-memory change log. Clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryChangeLog {
    records: Arc<Mutex<Vec<LoggedRecord>>>,
}

impl MemoryChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log holding `records` as they are, without checking their chain.
    #[must_use]
    pub fn from_records(records: Vec<LoggedRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the log holds no record.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    type Error = ChangeLogError;

    async fn append(&self, key: Uuid, record: ChangeRecord) -> Result<String, Self::Error> {
        let mut records = self.records.lock().await;

        let prev_hash = records.last().map(|last| last.hash.clone());
        let hash = content_hash(prev_hash.as_deref(), key, &record)
            .map_err(|e| ChangeLogError::Serialization(e.to_string()))?;

        records.push(LoggedRecord {
            key,
            record,
            prev_hash,
            hash: hash.clone(),
        });

        Ok(hash)
    }

    async fn read_latest(&self) -> Result<Option<LoggedRecord>, Self::Error> {
        Ok(self.records.lock().await.last().cloned())
    }

    async fn read_by_key(&self, key: Uuid) -> Result<Option<LoggedRecord>, Self::Error> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .rev()
            .find(|logged| logged.key == key)
            .cloned())
    }

    async fn read_all(&self) -> Result<Vec<LoggedRecord>, Self::Error> {
        Ok(self.records.lock().await.clone())
    }

    async fn reset(&self) -> Result<(), Self::Error> {
        self.records.lock().await.clear();
        Ok(())
    }
}
