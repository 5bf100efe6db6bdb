use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use plant_core::{PlantId, PlantRecord};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{StorageReadError, StorageWriteError};

const RECORD_EXTENSION: &str = "json";

/// An entry that could not be decoded during [`PlantStore::load_all`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedEntry {
    pub id: String,
    pub reason: String,
}

/// Result of a full scan: the decodable records in urgency order plus every
/// entry that had to be skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub records: Vec<PlantRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadOutcome {
    fn push(&mut self, key: &str, decoded: Result<PlantRecord, String>) {
        match decoded {
            Ok(record) => self.records.push(record),
            Err(reason) => self.skipped.push(SkippedEntry {
                id: key.to_string(),
                reason,
            }),
        }
    }

    fn finish(mut self) -> Self {
        self.records.sort();
        self
    }
}

/// Durable key-value storage of plant records, keyed by plant id.
#[async_trait]
pub trait PlantStore: Send + Sync {
    /// All stored records ordered by next notification, then id.
    async fn load_all(&self) -> Result<LoadOutcome, StorageReadError>;
    async fn get(&self, id: &PlantId) -> Result<Option<PlantRecord>, StorageReadError>;
    async fn upsert(&self, record: &PlantRecord) -> Result<(), StorageWriteError>;
    /// Removes the record; a missing id is not an error.
    async fn delete(&self, id: &PlantId) -> Result<(), StorageWriteError>;
}

fn decode_entry(key: &str, bytes: &[u8]) -> Result<PlantRecord, String> {
    let record: PlantRecord = serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
    if record.id.as_str() != key {
        return Err(format!("entry stored under `{key}` carries id `{}`", record.id));
    }
    Ok(record)
}

fn encode_record(record: &PlantRecord) -> Result<Vec<u8>, StorageWriteError> {
    serde_json::to_vec_pretty(record).map_err(|source| StorageWriteError::Encode {
        id: record.id.clone(),
        source,
    })
}

fn write_failed(path: &Path) -> impl FnOnce(std::io::Error) -> StorageWriteError {
    let path = path.to_path_buf();
    move |source| StorageWriteError::Io { path, source }
}

/// One JSON file per plant inside a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &PlantId) -> PathBuf {
        self.root.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn temp_path(&self, id: &PlantId) -> PathBuf {
        self.root.join(format!(".{id}.{RECORD_EXTENSION}.tmp"))
    }

    fn scan(root: &Path) -> Result<LoadOutcome, StorageReadError> {
        let unreadable = |source: std::io::Error| StorageReadError::Unreadable {
            path: root.to_path_buf(),
            source,
        };

        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(unreadable(std::io::Error::other(
                    "storage root is not a directory",
                )))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LoadOutcome::default()),
            Err(err) => return Err(unreadable(err)),
        }

        let mut outcome = LoadOutcome::default();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| unreadable(err.into()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !Self::is_record_file(path) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let decoded = fs::read(path)
                .map_err(|err| format!("unable to read {}: {err}", path.display()))
                .and_then(|bytes| decode_entry(key, &bytes));
            outcome.push(key, decoded);
        }
        Ok(outcome.finish())
    }

    fn is_record_file(path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        !hidden
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(RECORD_EXTENSION))
                .unwrap_or(false)
    }
}

#[async_trait]
impl PlantStore for DirectoryStore {
    async fn load_all(&self) -> Result<LoadOutcome, StorageReadError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|err| StorageReadError::Unreadable {
                path: self.root.clone(),
                source: std::io::Error::other(err),
            })?
    }

    async fn get(&self, id: &PlantId) -> Result<Option<PlantRecord>, StorageReadError> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageReadError::Unreadable { path, source }),
        };
        decode_entry(id.as_str(), &bytes)
            .map(Some)
            .map_err(|reason| StorageReadError::Corrupt {
                id: id.to_string(),
                reason,
            })
    }

    async fn upsert(&self, record: &PlantRecord) -> Result<(), StorageWriteError> {
        let payload = encode_record(record)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_failed(&self.root))?;
        let temp = self.temp_path(&record.id);
        let target = self.record_path(&record.id);
        tokio::fs::write(&temp, &payload)
            .await
            .map_err(write_failed(&temp))?;
        if let Err(source) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageWriteError::Io {
                path: target,
                source,
            });
        }
        tracing::debug!(id = %record.id, path = %target.display(), "plant record written");
        Ok(())
    }

    async fn delete(&self, id: &PlantId) -> Result<(), StorageWriteError> {
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(%id, "plant record deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageWriteError::Io { path, source }),
        }
    }
}

/// In-process store holding the serialized form of each record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes under `key`, bypassing encoding.
    pub fn insert_raw(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PlantStore for MemoryStore {
    async fn load_all(&self) -> Result<LoadOutcome, StorageReadError> {
        let entries = self.entries.read();
        let mut outcome = LoadOutcome::default();
        for (key, bytes) in entries.iter() {
            outcome.push(key, decode_entry(key, bytes));
        }
        Ok(outcome.finish())
    }

    async fn get(&self, id: &PlantId) -> Result<Option<PlantRecord>, StorageReadError> {
        let entries = self.entries.read();
        let Some(bytes) = entries.get(id.as_str()) else {
            return Ok(None);
        };
        decode_entry(id.as_str(), bytes)
            .map(Some)
            .map_err(|reason| StorageReadError::Corrupt {
                id: id.to_string(),
                reason,
            })
    }

    async fn upsert(&self, record: &PlantRecord) -> Result<(), StorageWriteError> {
        let payload = encode_record(record)?;
        self.entries
            .write()
            .insert(record.id.as_str().to_string(), payload);
        Ok(())
    }

    async fn delete(&self, id: &PlantId) -> Result<(), StorageWriteError> {
        self.entries.write().remove(id.as_str());
        Ok(())
    }
}
