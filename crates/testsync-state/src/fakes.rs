//! In-memory fake for the storage trait (testing only)
//!
//! `MemoryTestStore` satisfies the `TestStore` contract without any external
//! dependencies and records every write so tests can assert on them.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::schema::{
    HeaderUpdate, KnownRecord, RecordId, RecordPatch, StoreHeader, TestProperties,
};
use crate::storage_traits::*;

/// A write issued against a [`MemoryTestStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Created { id: RecordId, props: TestProperties },
    Updated { id: RecordId, patch: RecordPatch },
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<KnownRecord>,
    writes: Vec<StoreWrite>,
    header: StoreHeader,
}

/// In-memory test store backed by a `Vec<KnownRecord>` kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryTestStore {
    state: Mutex<MemoryState>,
}

impl MemoryTestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records. Seeding is not logged as a write.
    pub fn with_records(records: Vec<KnownRecord>) -> Self {
        let store = Self::new();
        store.state.lock().unwrap().records = records;
        store
    }

    pub fn with_header(self, header: StoreHeader) -> Self {
        self.state.lock().unwrap().header = header;
        self
    }

    /// Snapshot of every record currently held.
    pub fn records(&self) -> Vec<KnownRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Every write issued since construction (or the last `clear_writes`).
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

#[async_trait]
impl TestStore for MemoryTestStore {
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
            url: format!("memory://{id}"),
            id: id.clone(),
            properties: props.clone(),
            priority: None,
            assigned: Vec::new(),
            last_edited: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.records.push(record.clone());
        state.writes.push(StoreWrite::Created {
            id,
            props: props.clone(),
        });
        Ok(record)
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StorageError::RecordNotFound {
                id: id.0.clone(),
            })?;
        patch.apply(&mut record.properties);
        record.last_edited = Utc::now();
        state.writes.push(StoreWrite::Updated {
            id: id.clone(),
            patch: patch.clone(),
        });
        Ok(())
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
        update.apply(&mut self.state.lock().unwrap().header);
        Ok(())
    }
}
