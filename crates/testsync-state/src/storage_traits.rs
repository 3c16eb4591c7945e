//! Storage trait definitions for testsync
//!
//! `TestStore` is the narrow contract the reconciler talks to: query the
//! records of one namespace, create a record, patch a record. Header access
//! is used by the post-sync summary step.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{
    HeaderUpdate, KnownRecord, RecordId, RecordPatch, StoreHeader, TestProperties,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// External test record store.
///
/// Guarantees:
/// - `query(ns)` returns every record whose project is `ns`, archived or not.
/// - `create(props)` returns the stored record with a fresh id and url.
/// - `update(id, patch)` changes only the fields set in `patch`.
///
/// Authentication, transport retries and schema validation are the store's
/// business; callers treat any `Err` as fatal for the run.
#[async_trait]
pub trait TestStore: Send + Sync {
    /// All records of a namespace, in store order.
    async fn query(&self, namespace: &str) -> StorageResult<Vec<KnownRecord>>;

    /// Create a record from a full property set.
    async fn create(&self, props: &TestProperties) -> StorageResult<KnownRecord>;

    /// Patch an existing record. Returns `RecordNotFound` if absent.
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StorageResult<()>;

    /// Records of every namespace that are unarchived and active.
    async fn tracked(&self) -> StorageResult<Vec<KnownRecord>>;

    /// Read the store header.
    async fn header(&self) -> StorageResult<StoreHeader>;

    /// Rewrite the title counter and icon of the store header. A title
    /// without a counter is left as it is, formatting included.
    async fn update_header(&self, update: &HeaderUpdate) -> StorageResult<()>;
}
