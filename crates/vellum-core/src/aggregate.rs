//! The in-memory aggregate-root state machine.
//!
//! An [`AggregateRoot`] is a consistency boundary: its events are totally
//! ordered and its state is reconstructed together. State changes only by
//! applying events — [`AggregateRoot::trigger_event`] builds the next event
//! on the chain, applies it, and buffers it until [`AggregateRoot::save`]
//! appends the batch to an event store and publishes it.
//!
//! A replica is owned by one caller at a time; the pending buffer is not
//! shared. Cross-writer coordination happens optimistically at the record
//! manager, never here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::bus::SubscriberHub;
use crate::error::{Result, SourcingError};
use crate::event::{DomainEvent, EventPayload};
use crate::hash::EventDigest;
use crate::store::{EventStore, RecordManager};
use crate::topic::{self, AggregateFamily};

//─────────────────────────────
//  Lifecycle states
//─────────────────────────────

/// Lifecycle state of an aggregate replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    /// Accepting events.
    Live,
    /// Discarded in memory; the discard event is still pending.
    Discarded,
    /// Discarded and saved. Terminal.
    Sealed,
}

//─────────────────────────────
//  Aggregate root
//─────────────────────────────

/// An event-sourced aggregate root.
///
/// Domain attributes are held as a name → value map; user-defined event
/// variants fold into them through the mutators registered on the aggregate's
/// [`AggregateFamily`].
#[derive(Debug, Clone)]
pub struct AggregateRoot {
    id: Uuid,
    /// Originator topic naming the family this aggregate belongs to.
    family_topic: String,
    /// Count of applied events; also the position the next event will take.
    version: u64,
    is_discarded: bool,
    /// Digest of the most recently applied event.
    head_hash: EventDigest,
    created_on: DateTime<Utc>,
    last_modified_on: DateTime<Utc>,
    attributes: BTreeMap<String, Value>,
    /// Events applied in memory but not yet persisted.
    pending: Vec<DomainEvent>,
}

impl AggregateRoot {
    /// Create a new aggregate of the given family.
    ///
    /// Builds the creation event, applies it to yield fresh state, and
    /// enqueues it for the next `save`. The family is registered as a side
    /// effect (idempotently), so first use is enough.
    pub fn create(family: &AggregateFamily, attributes: BTreeMap<String, Value>) -> Result<Self> {
        Self::create_with_id(family, Uuid::new_v4(), attributes)
    }

    /// [`create`](Self::create) with a caller-chosen id.
    pub fn create_with_id(
        family: &AggregateFamily,
        id: Uuid,
        attributes: BTreeMap<String, Value>,
    ) -> Result<Self> {
        topic::register_family(family.clone())?;
        let event = DomainEvent::created(id, family.topic(), attributes)?;
        let state = event.mutate(None)?;
        let mut state = state.ok_or_else(|| {
            SourcingError::CorruptStream("creation event produced no state".into())
        })?;
        state.pending.push(event);
        Ok(state)
    }

    /// The aggregate identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Topic of the family this aggregate belongs to.
    pub fn family_topic(&self) -> &str {
        &self.family_topic
    }

    /// Count of applied events.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True once a discard event has been applied.
    pub fn is_discarded(&self) -> bool {
        self.is_discarded
    }

    /// Digest of the most recently applied event; ties the current state to
    /// its event chain.
    pub fn head_hash(&self) -> EventDigest {
        self.head_hash
    }

    /// Timestamp of the creation event.
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Timestamp of the most recently applied event.
    pub fn last_modified_on(&self) -> DateTime<Utc> {
        self.last_modified_on
    }

    /// Read one attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All attributes.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Mutable attribute access for family mutators.
    ///
    /// Only meaningful inside a mutator: changes made outside event
    /// application are lost on rehydration.
    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attributes
    }

    /// Events applied in memory but not yet persisted.
    pub fn pending(&self) -> &[DomainEvent] {
        &self.pending
    }

    /// Where this replica is in its lifecycle.
    pub fn state(&self) -> AggregateState {
        if !self.is_discarded {
            AggregateState::Live
        } else if self.pending.is_empty() {
            AggregateState::Sealed
        } else {
            AggregateState::Discarded
        }
    }

    /// Trigger a new event: chain it onto the head, apply it, and enqueue it
    /// for the next `save`.
    pub fn trigger_event(&mut self, payload: EventPayload) -> Result<()> {
        if self.is_discarded {
            return Err(SourcingError::AggregateDiscarded(self.id));
        }
        let event = DomainEvent::chained(self.id, self.version, self.head_hash, payload)?;
        self.apply(&event)?;
        self.pending.push(event);
        Ok(())
    }

    /// Assign an attribute. Sugar for triggering an
    /// [`EventPayload::AttributeChanged`].
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        self.trigger_event(EventPayload::AttributeChanged {
            name: name.into(),
            value,
        })
    }

    /// Trigger the terminal discard event. The aggregate stops accepting
    /// events immediately; the discard itself still needs a `save`.
    pub fn discard(&mut self) -> Result<()> {
        self.trigger_event(EventPayload::Discarded)
    }

    /// Persist the pending buffer, then publish it.
    ///
    /// Events are appended through the store in order. On the first error the
    /// save aborts: the error is returned unchanged and the pending buffer is
    /// left intact — the committed prefix stands in storage, this replica is
    /// ahead of it and should be considered stale. The hub is invoked only
    /// after every event in the batch has been accepted.
    pub async fn save<R: RecordManager>(
        &mut self,
        store: &EventStore<R>,
        hub: &SubscriberHub,
    ) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        for event in &self.pending {
            store.append(event).await?;
        }
        let batch = std::mem::take(&mut self.pending);
        hub.publish(&batch)?;
        Ok(())
    }

    /// Construct fresh state from a verified creation event.
    pub(crate) fn from_creation(
        event: &DomainEvent,
        family_topic: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: event.originator_id(),
            family_topic: family_topic.to_string(),
            version: 1,
            is_discarded: false,
            head_hash: event.event_hash(),
            created_on: event.timestamp(),
            last_modified_on: event.timestamp(),
            attributes,
            pending: Vec::new(),
        }
    }

    /// Fold one non-creation event into this state.
    ///
    /// Verification order is part of the contract: the chain head is checked
    /// before the content digest, so a broken link reports
    /// [`SourcingError::HeadHash`] and damaged content reports
    /// [`SourcingError::EventHash`].
    pub(crate) fn apply(&mut self, event: &DomainEvent) -> Result<()> {
        if event.previous_hash() != Some(self.head_hash) {
            return Err(SourcingError::HeadHash {
                originator_id: event.originator_id(),
                originator_version: event.originator_version(),
            });
        }
        event.check_hash()?;

        if event.originator_id() != self.id {
            return Err(SourcingError::CorruptStream(format!(
                "event for {} applied to aggregate {}",
                event.originator_id(),
                self.id
            )));
        }
        if event.originator_version() != self.version {
            return Err(SourcingError::CorruptStream(format!(
                "event at version {} applied to aggregate {} at version {}",
                event.originator_version(),
                self.id,
                self.version
            )));
        }
        if self.is_discarded {
            return Err(SourcingError::CorruptStream(format!(
                "event at version {} follows a discard of {}",
                event.originator_version(),
                self.id
            )));
        }

        match event.payload() {
            EventPayload::Created { .. } => {
                return Err(SourcingError::CorruptStream(format!(
                    "creation event for {} applied to existing state",
                    self.id
                )));
            }
            EventPayload::AttributeChanged { name, value } => {
                self.attributes.insert(name.clone(), value.clone());
            }
            EventPayload::Discarded => {
                self.is_discarded = true;
            }
            EventPayload::Custom { topic, .. } => {
                let family = topic::resolve_family(&self.family_topic)?;
                let mutator = family
                    .mutator(topic)
                    .ok_or_else(|| SourcingError::TopicResolution(topic.clone()))?;
                mutator(event, self)?;
            }
        }

        self.head_hash = event.event_hash();
        self.version += 1;
        self.last_modified_on = event.timestamp();
        Ok(())
    }
}
