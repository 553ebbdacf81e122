//! Document sinks: where transformed documents are written.

mod memory;
mod mongo;

use async_trait::async_trait;
use mongodb::bson::Document;
use serde_json::{Map, Value as JsonValue};

use crate::error::{IngestError, Result};

pub use memory::MemorySink;
pub use mongo::MongoSink;

/// Inserts one document into a named collection.
///
/// Each call is an independent write with no idempotency key: inserting the
/// same body twice stores two records.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert(&self, collection: &str, body: Map<String, JsonValue>) -> Result<()>;
}

/// Convert a JSON object to BSON, reading it as MongoDB Extended JSON v2.
///
/// `{"$date": "<rfc3339>"}` becomes a BSON UTC datetime; a date string that
/// does not parse makes the whole document invalid.
pub fn to_bson_document(body: Map<String, JsonValue>) -> Result<Document> {
    Document::try_from(body).map_err(|e| IngestError::InvalidDocument(e.to_string()))
}
