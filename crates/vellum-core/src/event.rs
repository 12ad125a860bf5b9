//! Hash-chained domain events and the mutate-function contract.
//!
//! A [`DomainEvent`] is an immutable value keyed by
//! `(originator_id, originator_version)`. Every event carries the digest of
//! its predecessor (`previous_hash`, absent on the creation event) and its own
//! content digest (`event_hash`), computed at construction over the canonical
//! encoding of all other fields. Applying an event to aggregate state first
//! verifies the chain head, then the content digest, then folds the payload
//! in — so a tampered `previous_hash` surfaces as [`SourcingError::HeadHash`]
//! while a tampered payload surfaces as [`SourcingError::EventHash`].
//!
//! Events are normally obtained by triggering them on an
//! [`AggregateRoot`](crate::aggregate::AggregateRoot); the public
//! constructors exist for adapters and tests.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::{Result, SourcingError};
use crate::hash::{self, EventDigest};
use crate::topic::{self, ATTRIBUTE_CHANGED_TOPIC, CREATED_TOPIC, DISCARDED_TOPIC};

//─────────────────────────────
//  Event payloads
//─────────────────────────────

/// Payload variants carried by a [`DomainEvent`].
///
/// The engine knows three built-in variants; everything else is a
/// user-defined `Custom` variant, opaque to the core and dispatched through
/// its family's mutator table.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Creation payload: the aggregate's initial attributes.
    Created {
        /// Initial attribute values, keyed by attribute name.
        attributes: BTreeMap<String, Value>,
    },
    /// An attribute assignment.
    AttributeChanged {
        /// Attribute name.
        name: String,
        /// New value.
        value: Value,
    },
    /// Terminal discard marker. No event may follow it on the chain.
    Discarded,
    /// A user-defined event variant.
    Custom {
        /// The variant's registered topic.
        topic: String,
        /// Variant payload, opaque to the engine.
        data: Value,
    },
}

impl EventPayload {
    /// Build a user-defined payload.
    pub fn custom(topic: impl Into<String>, data: Value) -> Self {
        Self::Custom {
            topic: topic.into(),
            data,
        }
    }

    /// The topic naming this variant on the wire and in storage.
    pub fn topic(&self) -> &str {
        match self {
            Self::Created { .. } => CREATED_TOPIC,
            Self::AttributeChanged { .. } => ATTRIBUTE_CHANGED_TOPIC,
            Self::Discarded => DISCARDED_TOPIC,
            Self::Custom { topic, .. } => topic,
        }
    }
}

//─────────────────────────────
//  Domain events
//─────────────────────────────

/// A hash-chained, immutable domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    originator_id: Uuid,
    originator_version: u64,
    /// Names the aggregate family; present only on the creation event.
    originator_topic: Option<String>,
    timestamp: DateTime<Utc>,
    /// Digest of the preceding event; absent on the creation event.
    previous_hash: Option<EventDigest>,
    event_hash: EventDigest,
    payload: EventPayload,
}

impl DomainEvent {
    /// Construct a creation event (version 0, no predecessor).
    pub fn created(
        originator_id: Uuid,
        originator_topic: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Result<Self> {
        Self::seal(
            originator_id,
            0,
            Some(originator_topic.into()),
            None,
            EventPayload::Created { attributes },
        )
    }

    /// Construct a non-creation event chained onto `previous_hash`.
    pub fn chained(
        originator_id: Uuid,
        originator_version: u64,
        previous_hash: EventDigest,
        payload: EventPayload,
    ) -> Result<Self> {
        Self::seal(
            originator_id,
            originator_version,
            None,
            Some(previous_hash),
            payload,
        )
    }

    fn seal(
        originator_id: Uuid,
        originator_version: u64,
        originator_topic: Option<String>,
        previous_hash: Option<EventDigest>,
        payload: EventPayload,
    ) -> Result<Self> {
        let mut event = Self {
            originator_id,
            originator_version,
            originator_topic,
            timestamp: now_micros(),
            previous_hash,
            event_hash: [0; 32],
            payload,
        };
        event.event_hash = hash::chain_hash(&event.body())?;
        Ok(event)
    }

    /// The aggregate this event belongs to.
    pub fn originator_id(&self) -> Uuid {
        self.originator_id
    }

    /// Position of this event on the aggregate's chain (0 for creation).
    pub fn originator_version(&self) -> u64 {
        self.originator_version
    }

    /// Family topic carried by creation events.
    pub fn originator_topic(&self) -> Option<&str> {
        self.originator_topic.as_deref()
    }

    /// Wall-clock time at construction. Informational; never used for
    /// ordering.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Digest of the preceding event on the chain.
    pub fn previous_hash(&self) -> Option<EventDigest> {
        self.previous_hash
    }

    /// Content digest of this event.
    pub fn event_hash(&self) -> EventDigest {
        self.event_hash
    }

    /// The variant payload.
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Topic of this event's variant.
    pub fn topic(&self) -> &str {
        self.payload.topic()
    }

    /// Recompute the content digest and compare it against the stored one.
    ///
    /// Used during rehydration and on demand; any byte of drift in the
    /// canonical body fails with [`SourcingError::EventHash`].
    pub fn check_hash(&self) -> Result<()> {
        let recomputed = hash::chain_hash(&self.body())?;
        if recomputed != self.event_hash {
            return Err(SourcingError::EventHash {
                originator_id: self.originator_id,
                originator_version: self.originator_version,
            });
        }
        Ok(())
    }

    /// Fold this event into aggregate state.
    ///
    /// Creation events construct fresh state (and require that none exists);
    /// every other event verifies the chain against the current head and
    /// advances it. Returns the next state.
    pub fn mutate(&self, state: Option<AggregateRoot>) -> Result<Option<AggregateRoot>> {
        match (&self.payload, state) {
            (EventPayload::Created { attributes }, None) => {
                self.check_hash()?;
                if self.originator_version != 0 {
                    return Err(SourcingError::CorruptStream(format!(
                        "creation event for {} at version {}",
                        self.originator_id, self.originator_version
                    )));
                }
                let family_topic = self.originator_topic.as_deref().ok_or_else(|| {
                    SourcingError::CorruptStream(format!(
                        "creation event for {} carries no originator topic",
                        self.originator_id
                    ))
                })?;
                // The family must be known to this process before any of its
                // custom events can dispatch.
                topic::resolve_family(family_topic)?;
                Ok(Some(AggregateRoot::from_creation(
                    self,
                    family_topic,
                    attributes.clone(),
                )))
            }
            (EventPayload::Created { .. }, Some(_)) => Err(SourcingError::CorruptStream(format!(
                "creation event for {} applied to existing state",
                self.originator_id
            ))),
            (_, None) => Err(SourcingError::CorruptStream(format!(
                "event at version {} for {} applied without prior state",
                self.originator_version, self.originator_id
            ))),
            (_, Some(mut state)) => {
                state.apply(self)?;
                Ok(Some(state))
            }
        }
    }

    /// The canonical body: every field except `event_hash`, with the payload
    /// flattened in. This is exactly what the content digest covers.
    pub(crate) fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("originator_id".into(), json!(self.originator_id));
        body.insert("originator_version".into(), json!(self.originator_version));
        if let Some(topic) = &self.originator_topic {
            body.insert("originator_topic".into(), json!(topic));
        }
        body.insert(
            "timestamp".into(),
            json!(self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        if let Some(previous) = &self.previous_hash {
            body.insert("previous_hash".into(), json!(hash::encode_digest(previous)));
        }
        match &self.payload {
            EventPayload::Created { attributes } => {
                body.insert("attributes".into(), json!(attributes));
            }
            EventPayload::AttributeChanged { name, value } => {
                body.insert("name".into(), json!(name));
                body.insert("value".into(), value.clone());
            }
            EventPayload::Discarded => {}
            EventPayload::Custom { data, .. } => {
                body.insert("data".into(), data.clone());
            }
        }
        Value::Object(body)
    }

    /// Rebuild an event from its variant topic and decoded stored body.
    pub(crate) fn from_body(topic: &str, body: &Value) -> Result<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| SourcingError::Codec("stored event body is not an object".into()))?;

        let originator_id = parse_uuid(body, "originator_id")?;
        let originator_version = parse_u64(body, "originator_version")?;
        let originator_topic = match body.get("originator_topic") {
            Some(value) => Some(parse_str(value, "originator_topic")?.to_string()),
            None => None,
        };
        let timestamp = parse_timestamp(body)?;
        let previous_hash = match body.get("previous_hash") {
            Some(value) => Some(hash::decode_digest(parse_str(value, "previous_hash")?)?),
            None => None,
        };
        let event_hash = match body.get("event_hash") {
            Some(value) => hash::decode_digest(parse_str(value, "event_hash")?)?,
            None => return Err(SourcingError::Codec("stored event has no event_hash".into())),
        };

        let payload = match topic {
            CREATED_TOPIC => {
                let attributes = body
                    .get("attributes")
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        SourcingError::Codec("creation event has no attributes".into())
                    })?;
                EventPayload::Created {
                    attributes: attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                }
            }
            ATTRIBUTE_CHANGED_TOPIC => EventPayload::AttributeChanged {
                name: body
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SourcingError::Codec("attribute event has no name".into()))?
                    .to_string(),
                value: body.get("value").cloned().unwrap_or(Value::Null),
            },
            DISCARDED_TOPIC => EventPayload::Discarded,
            custom => EventPayload::Custom {
                topic: custom.to_string(),
                data: body.get("data").cloned().unwrap_or(Value::Null),
            },
        };

        Ok(Self {
            originator_id,
            originator_version,
            originator_topic,
            timestamp,
            previous_hash,
            event_hash,
            payload,
        })
    }
}

//─────────────────────────────
//  Body field helpers
//─────────────────────────────

/// Wall-clock now, truncated to whole microseconds so the in-memory value
/// matches the canonical (and stored) rendering exactly.
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

fn parse_uuid(body: &Map<String, Value>, key: &str) -> Result<Uuid> {
    let raw = body
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SourcingError::Codec(format!("stored event has no {key}")))?;
    Uuid::parse_str(raw).map_err(|e| SourcingError::Codec(format!("invalid {key} '{raw}': {e}")))
}

fn parse_u64(body: &Map<String, Value>, key: &str) -> Result<u64> {
    body.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| SourcingError::Codec(format!("stored event has no {key}")))
}

fn parse_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| SourcingError::Codec(format!("stored event field {key} is not a string")))
}

fn parse_timestamp(body: &Map<String, Value>) -> Result<DateTime<Utc>> {
    let raw = body
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| SourcingError::Codec("stored event has no timestamp".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SourcingError::Codec(format!("invalid timestamp '{raw}': {e}")))
}
