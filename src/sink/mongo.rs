use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::{Map, Value as JsonValue};

use super::{to_bson_document, DocumentSink};
use crate::error::{IngestError, Result};

/// MongoDB sink
///
/// The driver keeps its own connection pool, so one `MongoSink` is built at
/// startup and shared for the life of the process.
pub struct MongoSink {
    client: Client,
    database: String,
    insert_timeout: Option<Duration>,
}

impl MongoSink {
    /// Build a client for `uri`. No connection is made until the first
    /// operation; use [`MongoSink::ping`] to check the server up front.
    pub async fn connect(uri: &str, database: &str, insert_timeout: Option<Duration>) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| IngestError::Config(format!("Failed to parse MongoDB URI: {}", e)))?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(options)
            .map_err(|e| IngestError::Config(format!("Failed to create MongoDB client: {}", e)))?;

        Ok(Self {
            client,
            database: database.to_string(),
            insert_timeout,
        })
    }

    /// Round-trip a `ping` command against the configured database
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn insert(&self, collection: &str, body: Map<String, JsonValue>) -> Result<()> {
        let document = to_bson_document(body)?;
        let collection = self
            .client
            .database(&self.database)
            .collection::<Document>(collection);

        let insert = collection.insert_one(document, None);
        let result = match self.insert_timeout {
            Some(limit) => tokio::time::timeout(limit, insert)
                .await
                .map_err(|_| IngestError::Timeout(limit))??,
            None => insert.await?,
        };

        log::debug!(
            "Inserted {} into {}.{}",
            result.inserted_id,
            self.database,
            collection.name()
        );
        Ok(())
    }
}
