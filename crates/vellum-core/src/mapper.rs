//! Event ⇄ sequenced-record conversion.
//!
//! The mapper extracts the record key (`sequence_id`, `position`, `topic`)
//! from an event and serializes the rest — the canonical body plus the stored
//! `event_hash` — into the record's state blob. The blob codec is selectable;
//! both options are deterministic and round-tripping, which is all the store
//! requires. Hashing is *not* a codec concern: digests are always computed
//! over the canonical encoding (see [`crate::hash`]), whatever the blob is
//! written in.

use serde_json::{json, Value};

use crate::error::{Result, SourcingError};
use crate::event::DomainEvent;
use crate::hash;
use crate::store::SequencedRecord;

/// Blob codec for the record state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Compact MessagePack with named fields.
    #[default]
    MessagePack,
    /// Plain JSON, for backends and humans that want readable blobs.
    Json,
}

impl Codec {
    fn encode(&self, body: &Value) -> Result<Vec<u8>> {
        match self {
            Self::MessagePack => rmp_serde::to_vec_named(body)
                .map_err(|e| SourcingError::Codec(format!("msgpack encode failed: {e}"))),
            Self::Json => serde_json::to_vec(body)
                .map_err(|e| SourcingError::Codec(format!("json encode failed: {e}"))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        match self {
            Self::MessagePack => rmp_serde::from_slice(bytes)
                .map_err(|e| SourcingError::Codec(format!("msgpack decode failed: {e}"))),
            Self::Json => serde_json::from_slice(bytes)
                .map_err(|e| SourcingError::Codec(format!("json decode failed: {e}"))),
        }
    }
}

/// Converts domain events to and from sequenced storage records.
#[derive(Debug, Clone, Default)]
pub struct SequencedItemMapper {
    codec: Codec,
}

impl SequencedItemMapper {
    /// A mapper writing blobs with the given codec.
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    /// The configured blob codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Serialize an event into a storage record.
    pub fn to_record(&self, event: &DomainEvent) -> Result<SequencedRecord> {
        let mut body = event.body();
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "event_hash".into(),
                json!(hash::encode_digest(&event.event_hash())),
            );
        }
        Ok(SequencedRecord {
            sequence_id: event.originator_id(),
            position: event.originator_version(),
            topic: event.topic().to_string(),
            state: self.codec.encode(&body)?,
        })
    }

    /// Deserialize a storage record back into a fully populated event.
    pub fn from_record(&self, record: &SequencedRecord) -> Result<DomainEvent> {
        let body = self.codec.decode(&record.state)?;
        DomainEvent::from_body(&record.topic, &body)
    }
}
