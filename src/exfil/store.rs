//! Persistence of decoded confirmations.

use crate::types::{ExfiltratedRecord, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// A persisted confirmation that a decoy package was installed somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub package: String,
    #[serde(rename = "sourceIP")]
    pub source_ip: String,
    pub hostname: String,
    pub username: String,
    pub working_directory: String,
}

impl Confirmation {
    fn from_record(id: u64, record: &ExfiltratedRecord) -> Self {
        Self {
            id,
            timestamp: record.timestamp,
            package: record.package_name.clone(),
            source_ip: record.source_ip.clone(),
            hostname: record.hostname.clone(),
            username: record.username.clone(),
            working_directory: record.working_directory.clone(),
        }
    }
}

/// Storage backend for confirmations.
#[async_trait]
pub trait ConfirmationStore: Send + Sync {
    /// Persist a record, assigning the next id.
    async fn add(&self, record: &ExfiltratedRecord) -> Result<Confirmation>;

    /// Every stored confirmation, oldest first.
    async fn all(&self) -> Result<Vec<Confirmation>>;
}

/// Process-local store, used when no file is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    confirmations: Mutex<Vec<Confirmation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfirmationStore for MemoryStore {
    async fn add(&self, record: &ExfiltratedRecord) -> Result<Confirmation> {
        let mut confirmations = self.confirmations.lock().await;
        let confirmation = Confirmation::from_record(confirmations.len() as u64 + 1, record);
        confirmations.push(confirmation.clone());
        Ok(confirmation)
    }

    async fn all(&self) -> Result<Vec<Confirmation>> {
        Ok(self.confirmations.lock().await.clone())
    }
}

/// Append-only JSON-lines file, one confirmation per line.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    /// Next id to assign, loaded from the file on first write.
    next_id: Mutex<Option<u64>>,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_id: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Confirmation>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut confirmations = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Confirmation>(line) {
                Ok(confirmation) => confirmations.push(confirmation),
                Err(e) => warn!("{}:{}: skipping unreadable record: {}", self.path.display(), number + 1, e),
            }
        }
        Ok(confirmations)
    }
}

#[async_trait]
impl ConfirmationStore for JsonLinesStore {
    async fn add(&self, record: &ExfiltratedRecord) -> Result<Confirmation> {
        let mut next_id = self.next_id.lock().await;
        let id = match *next_id {
            Some(id) => id,
            None => {
                self.read_all()
                    .await?
                    .iter()
                    .map(|c| c.id)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        };

        let confirmation = Confirmation::from_record(id, record);
        let mut line = serde_json::to_string(&confirmation)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        *next_id = Some(id + 1);
        Ok(confirmation)
    }

    async fn all(&self) -> Result<Vec<Confirmation>> {
        self.read_all().await
    }
}
