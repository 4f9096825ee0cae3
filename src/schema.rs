use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::util::{generate_batch_id, now_unix};

/// Identity of this collector as seen by the ingestion service.
///
/// Used as:
/// - `metadata.producer` on every processed item
/// - part of the HTTP User-Agent header
pub const PRODUCER: &str = "sysflow-collector";

/// Version of the processed-item schema.
///
/// DESIGN NOTES:
/// - Bump this whenever the shape of `ProcessedItem` changes.
/// - The ingestion service routes items by `type` and `schema_version`.
pub const SCHEMA_VERSION: &str = "0.2";

// ------------------------------------------------------------
// Raw measurement
// ------------------------------------------------------------
//
// One sample pulled from the collection source.
//
// A raw item is immutable once created and lives only within
// the collection cycle that produced it. Nothing is persisted
// by the pipeline itself.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RawItem {
    /// Sample timestamp in seconds since Unix epoch
    pub timestamp: i64,

    /// Type discriminator (e.g. "system", "memory", "network")
    ///
    /// Serialized as `type`; the ingestion service uses it for routing.
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-form measurement fields, flattened onto the item
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawItem {
    /// Creates a raw item stamped with the current time.
    pub fn new(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            timestamp: now_unix(),
            kind: kind.into(),
            fields,
        }
    }
}

// ------------------------------------------------------------
// Processed measurement
// ------------------------------------------------------------
//
// A raw item after it has passed through a transform worker.
//
// IMPORTANT:
// - Exactly one processed item per raw item. Items are never
//   merged or split during processing.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessedItem {
    /// The original measurement, flattened onto the wire format
    #[serde(flatten)]
    pub item: RawItem,

    /// Processing metadata attached by the worker
    pub metadata: ProcessingMetadata,
}

impl ProcessedItem {
    /// Wraps a raw item with processing metadata.
    pub fn from_raw(item: RawItem) -> Self {
        Self {
            item,
            metadata: ProcessingMetadata {
                processed_at: now_unix(),
                producer: PRODUCER.to_string(),
                schema_version: SCHEMA_VERSION.to_string(),
            },
        }
    }
}

/// Metadata attached to every processed item.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingMetadata {
    /// When the worker processed the item (seconds since Unix epoch)
    pub processed_at: i64,

    /// Producer identity, see [`PRODUCER`]
    pub producer: String,

    /// Schema version, see [`SCHEMA_VERSION`]
    pub schema_version: String,
}

// ------------------------------------------------------------
// Delivery envelope
// ------------------------------------------------------------
//
// Wraps one delivery batch for the ingestion endpoint:
//
//     POST <endpoint>/api/v1/metrics
//     { "timestamp": ..., "batch_id": "...", "data": [...] }
//
// One envelope maps to exactly one retry sequence. Retries reuse
// the envelope; they are never re-enveloped, so the batch id is
// stable across attempts.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliveryEnvelope {
    /// Envelope creation time in seconds since Unix epoch
    pub timestamp: i64,

    /// Generated identifier, unique per delivery batch
    pub batch_id: String,

    /// The processed items carried by this envelope
    pub data: Vec<ProcessedItem>,
}

impl DeliveryEnvelope {
    /// Builds an envelope around one delivery batch.
    ///
    /// Called immediately before network dispatch so the capture
    /// timestamp reflects the actual send time.
    pub fn new(data: Vec<ProcessedItem>) -> Self {
        Self {
            timestamp: now_unix(),
            batch_id: generate_batch_id(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_raw() -> RawItem {
        let mut fields = Map::new();
        fields.insert("cpu_usage".to_string(), json!(45.2));
        RawItem::new("system", fields)
    }

    #[test]
    fn raw_item_serializes_flat_with_type_tag() {
        let item = sample_raw();
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["type"], "system");
        assert_eq!(value["cpu_usage"], 45.2);
        assert!(value["timestamp"].is_i64());
        // Fields must be flattened, not nested under "fields"
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn processed_item_carries_metadata() {
        let processed = ProcessedItem::from_raw(sample_raw());
        let value = serde_json::to_value(&processed).unwrap();

        assert_eq!(value["type"], "system");
        assert_eq!(value["metadata"]["producer"], PRODUCER);
        assert_eq!(value["metadata"]["schema_version"], SCHEMA_VERSION);
        assert!(value["metadata"]["processed_at"].is_i64());
    }

    #[test]
    fn envelope_matches_ingestion_contract() {
        let envelope = DeliveryEnvelope::new(vec![ProcessedItem::from_raw(sample_raw())]);
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(value["timestamp"].is_i64());
        assert!(value["batch_id"].as_str().unwrap().starts_with("batch_"));
        assert_eq!(value["data"].as_array().unwrap().len(), 1);
    }
}
