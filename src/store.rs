//! Key-value store seam used by the check-in handler.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::model::{CheckinRecord, DynamoModel};

/// Status code reported by the store for a completed upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStatus(pub u16);

impl UpsertStatus {
    pub const OK: UpsertStatus = UpsertStatus(200);
    pub const NO_CONTENT: UpsertStatus = UpsertStatus(204);

    pub fn is_success(self) -> bool {
        self == Self::OK || self == Self::NO_CONTENT
    }
}

#[async_trait]
pub trait CheckinStore: Send + Sync {
    /// Fetch the row keyed by `(partition, row)`; an absent row is [`StoreError::NotFound`].
    async fn fetch(&self, partition: &str, row: &str) -> Result<CheckinRecord>;

    /// Insert the record, or replace the row already stored under its key.
    async fn upsert(&self, record: &CheckinRecord) -> Result<UpsertStatus>;
}

/// In-process store backing the router tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), CheckinRecord>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_fetch: Mutex<Option<String>>,
    fail_upsert: Mutex<Option<String>>,
    upsert_status: Mutex<Option<UpsertStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CheckinRecord) {
        self.lock_records().insert(record.partition_sort_key(), record);
    }

    pub fn record(&self, partition: &str, row: &str) -> Option<CheckinRecord> {
        self.lock_records()
            .get(&(partition.to_string(), row.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent fetch fail with a backend error.
    pub fn fail_fetch_with(&self, message: &str) {
        *self.fail_fetch.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    /// Make every subsequent upsert fail with a backend error.
    pub fn fail_upsert_with(&self, message: &str) {
        *self.fail_upsert.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    /// Report `status` for subsequent upserts. A non-success status leaves the row unwritten.
    pub fn respond_with(&self, status: UpsertStatus) {
        *self.upsert_status.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), CheckinRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckinStore for MemoryStore {
    async fn fetch(&self, partition: &str, row: &str) -> Result<CheckinRecord> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.fail_fetch.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(StoreError::DynamoDb(message));
        }

        self.record(partition, row).ok_or(StoreError::NotFound)
    }

    async fn upsert(&self, record: &CheckinRecord) -> Result<UpsertStatus> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.fail_upsert.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(StoreError::DynamoDb(message));
        }

        let status = (*self.upsert_status.lock().unwrap_or_else(|e| e.into_inner()))
            .unwrap_or(UpsertStatus::NO_CONTENT);
        if status.is_success() {
            self.insert(record.clone());
        }
        Ok(status)
    }
}
