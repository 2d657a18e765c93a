//! Outbox persistence.
//!
//! Stores keep records in insertion order; `get_all` returns them oldest first.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::message::QueuedMessage;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("outbox io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("outbox serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable key-value store for outbox records, keyed by message id.
#[async_trait]
pub trait OutboxStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace.
    async fn put(&self, message: QueuedMessage) -> Result<(), PersistenceError>;

    async fn get(&self, id: &str) -> Result<Option<QueuedMessage>, PersistenceError>;

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, PersistenceError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, PersistenceError>;
}

fn upsert(records: &mut Vec<QueuedMessage>, message: QueuedMessage) {
    match records.iter_mut().find(|r| r.id == message.id) {
        Some(existing) => *existing = message,
        None => records.push(message),
    }
}

/// Volatile store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<QueuedMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Vec<QueuedMessage>> {
        self.records.lock().expect("outbox memory store mutex poisoned")
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn put(&self, message: QueuedMessage) -> Result<(), PersistenceError> {
        upsert(&mut self.records(), message);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedMessage>, PersistenceError> {
        Ok(self.records().iter().find(|r| r.id == id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, PersistenceError> {
        Ok(self.records().clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }
}

/// JSON file store. The whole outbox is one array document, rewritten
/// through a temp file and rename on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: tokio::sync::Mutex<Vec<QueuedMessage>>,
}

impl FileStore {
    /// Open `path`, loading existing records. A missing file is an empty outbox.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), count = records.len(), "Loaded outbox");
        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, records: &[QueuedMessage]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(records)?;
        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), count = records.len(), "Outbox saved");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for FileStore {
    async fn put(&self, message: QueuedMessage) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        upsert(&mut next, message);
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedMessage>, PersistenceError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, PersistenceError> {
        Ok(self.records.lock().await.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut records = self.records.lock().await;
        if !records.iter().any(|r| r.id == id) {
            return Ok(false);
        }
        let next: Vec<QueuedMessage> = records.iter().filter(|r| r.id != id).cloned().collect();
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }
}
