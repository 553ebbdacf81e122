use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::Document;
use serde_json::{Map, Value as JsonValue};

use super::{to_bson_document, DocumentSink};
use crate::error::{IngestError, Result};

/// In-process sink that keeps every inserted document, in insertion order.
///
/// Documents go through the same BSON conversion as [`super::MongoSink`].
/// Failures queued with [`MemorySink::fail_next`] are returned by the next
/// inserts, one per call, before anything is stored.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, Document)>>,
    failures: Mutex<VecDeque<IngestError>>,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert fail with `err`.
    pub fn fail_next(&self, err: IngestError) {
        self.lock_failures().push_back(err);
    }

    /// Documents stored in `collection`, oldest first.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock_records()
            .iter()
            .filter(|(name, _)| name == collection)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    /// Collection names in the order inserts landed, one entry per record.
    pub fn insert_order(&self) -> Vec<String> {
        self.lock_records().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Total stored records across all collections.
    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of insert calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<(String, Document)>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, VecDeque<IngestError>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn insert(&self, collection: &str, body: Map<String, JsonValue>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.lock_failures().pop_front() {
            return Err(err);
        }

        let document = to_bson_document(body)?;
        self.lock_records().push((collection.to_string(), document));
        Ok(())
    }
}
