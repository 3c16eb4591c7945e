//! testsync-state: record store backends for testsync
//!
//! This crate owns every byte that leaves the process for the external test
//! record store. It defines the store contract the reconciler depends on and
//! ships three backends.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: a narrow, backend-agnostic contract and faithful property mapping.
//!
//! ## Key Components
//!
//! - `TestStore`: query / create / update contract
//! - `MemoryTestStore`: in-memory fake with a write log
//! - `JsonFileStore`: single-file JSON store
//! - `NotionTestStore`: Notion database over HTTP

mod error;
pub mod fakes;
pub mod json_store;
pub mod notion;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use json_store::JsonFileStore;
pub use notion::{NotionConfig, NotionTestStore};
pub use schema::{
    icon_from_url, icon_url, replace_counter, HeaderUpdate, KnownRecord, PersonRef, RecordId,
    RecordPatch, StoreHeader, TestProperties, TestStatus,
};
pub use storage_traits::{StorageResult, TestStore};
