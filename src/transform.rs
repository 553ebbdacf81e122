//! Turn raw JSON text into a routed document.
//!
//! The top-level object is kept as written (key order included); only
//! `CreatedAt` is rewritten into MongoDB's Extended JSON date form so the sink
//! stores it as a BSON datetime instead of a string.

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{IngestError, Result};

/// Field naming the destination collection.
pub const ROUTING_FIELD: &str = "Action";
/// Timestamp field stored as a database-native date.
pub const TIMESTAMP_FIELD: &str = "CreatedAt";

/// Typed view of the two fields this crate interprets. Everything else in the
/// object is an opaque pass-through bag.
#[derive(Debug, Default)]
struct RoutingFields {
    action: Option<String>,
    created_at: Option<String>,
}

/// A document ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedDocument {
    /// Destination collection (the `Action` value)
    pub collection: String,
    /// Full top-level object with `CreatedAt` rewritten
    pub body: Map<String, JsonValue>,
}

/// Parse `content`, rewrite `CreatedAt` and extract the routing key.
pub fn transform(content: &str) -> Result<TransformedDocument> {
    let value: JsonValue = serde_json::from_str(content)
        .map_err(|e| IngestError::Parse(format!("JSON parse error: {}", e)))?;

    let mut body = match value {
        JsonValue::Object(map) => map,
        other => {
            return Err(IngestError::Parse(format!(
                "expected a JSON object at top level, found {}",
                json_kind(&other)
            )))
        }
    };

    let fields = decode_routing_fields(&body)?;

    if let Some(created_at) = fields.created_at {
        // insert() on an existing key keeps its position
        body.insert(TIMESTAMP_FIELD.to_string(), json!({ "$date": created_at }));
    }

    let collection = fields.action.ok_or(IngestError::RoutingKeyMissing)?;
    validate_collection_name(&collection)?;

    Ok(TransformedDocument { collection, body })
}

fn decode_routing_fields(body: &Map<String, JsonValue>) -> Result<RoutingFields> {
    let mut fields = RoutingFields::default();
    if let Some(value) = body.get(ROUTING_FIELD) {
        fields.action = decode_field(ROUTING_FIELD, value)?;
    }
    if let Some(value) = body.get(TIMESTAMP_FIELD) {
        fields.created_at = decode_field(TIMESTAMP_FIELD, value)?;
    }
    Ok(fields)
}

fn decode_field(field: &'static str, value: &JsonValue) -> Result<Option<String>> {
    Option::<String>::deserialize(value).map_err(|_| IngestError::InvalidField {
        field,
        reason: format!("expected a string, found {}", json_kind(value)),
    })
}

/// Reject names MongoDB refuses as collection names.
fn validate_collection_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "collection name must not be empty"
    } else if name.contains('$') {
        "collection name must not contain '$'"
    } else if name.contains('\0') {
        "collection name must not contain NUL"
    } else if name.starts_with("system.") {
        "collection names starting with 'system.' are reserved"
    } else {
        return Ok(());
    };
    Err(IngestError::InvalidField {
        field: ROUTING_FIELD,
        reason: reason.to_string(),
    })
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
