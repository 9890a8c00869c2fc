/// JSON file backend for the processed-post store.
///
/// The whole log lives in one JSON array. It is loaded at open and rewritten
/// through a temp file + rename on every append so a crash mid-write leaves
/// the previous version intact.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{ProcessedRecord, ProcessedStore};
use crate::error::StoreError;

struct Inner {
    records: Vec<ProcessedRecord>,
    ids: HashSet<String>,
}

pub struct JsonProcessedStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonProcessedStore {
    /// Open the log at `path`, creating an empty one if the file is missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str::<Vec<ProcessedRecord>>(&content).map_err(|e| {
                StoreError::Corrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Creating processed-post log at {}", path.display());
                write_atomically(&path, &[]).await?;
                Vec::new()
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        let ids = records.iter().map(|r| r.post_id.clone()).collect();
        log::info!(
            "Loaded {} processed posts from {}",
            records.len(),
            path.display()
        );

        Ok(Self {
            path,
            inner: Mutex::new(Inner { records, ids }),
        })
    }

    /// Number of records currently in the log.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProcessedStore for JsonProcessedStore {
    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.ids.contains(post_id))
    }

    async fn record(&self, record: ProcessedRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        if inner.ids.contains(&record.post_id) {
            return Err(StoreError::Duplicate(record.post_id));
        }

        let post_id = record.post_id.clone();
        inner.records.push(record);
        if let Err(e) = write_atomically(&self.path, &inner.records).await {
            // Keep memory consistent with what is on disk.
            inner.records.pop();
            return Err(e);
        }

        log::debug!("Recorded post {} as processed", post_id);
        inner.ids.insert(post_id);
        Ok(())
    }
}

async fn write_atomically(path: &Path, records: &[ProcessedRecord]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let body = serde_json::to_string_pretty(records).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}
