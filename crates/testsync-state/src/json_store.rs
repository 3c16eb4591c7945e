//! Single-file JSON record store.
//!
//! Layout: one document `{ "header": {...}, "records": [...] }`. The file is
//! rewritten atomically after every write, so a crash never leaves a
//! half-written store behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{
    HeaderUpdate, KnownRecord, RecordId, RecordPatch, StoreHeader, TestProperties,
};
use crate::storage_traits::{StorageResult, TestStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    header: StoreHeader,
    #[serde(default)]
    records: Vec<KnownRecord>,
}

/// File-backed test store. A missing file is an empty store.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories if needed.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(StorageError::Io(e)),
        };
        debug!(path = %path.display(), records = state.records.len(), "Opened JSON store");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreFile) -> StorageResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(state)?)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl TestStore for JsonFileStore {
    async fn query(&self, namespace: &str) -> StorageResult<Vec<KnownRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|r| r.properties.project == namespace)
            .cloned()
            .collect())
    }

    async fn create(&self, props: &TestProperties) -> StorageResult<KnownRecord> {
        let id = RecordId::new();
        let record = KnownRecord {
            url: format!("file://{}#{}", self.path.display(), id),
            id,
            properties: props.clone(),
            priority: None,
            assigned: Vec::new(),
            last_edited: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.records.push(record.clone());
        self.persist(&state)?;
        Ok(record)
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StorageError::RecordNotFound { id: id.0.clone() })?;
        patch.apply(&mut record.properties);
        record.last_edited = Utc::now();
        self.persist(&state)
    }

    async fn tracked(&self) -> StorageResult<Vec<KnownRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|r| !r.properties.archived && r.properties.active)
            .cloned()
            .collect())
    }

    async fn header(&self) -> StorageResult<StoreHeader> {
        Ok(self.state.lock().unwrap().header.clone())
    }

    async fn update_header(&self, update: &HeaderUpdate) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        update.apply(&mut state.header);
        self.persist(&state)
    }
}
