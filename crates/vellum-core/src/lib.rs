#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **vellum-core** – Hash-chained event-sourcing engine.
//!
//! This crate provides the complete engine that turns mutations of domain
//! aggregates into an append-only, hash-chained sequence of events, persists
//! those events under optimistic concurrency control, and reconstitutes
//! aggregate state by replaying them. It defines the storage contract without
//! shipping a concrete driver; drivers (in-memory, embedded, SQL, etc.) live
//! in separate crates implementing [`RecordManager`].
//!
//! ## Modules
//! * `error`      – typed error surface shared across the engine
//! * `hash`       – canonical encoding and Blake3 chain digests
//! * `topic`      – topic strings and the process-wide family registry
//! * `event`      – hash-chained domain events and the mutate contract
//! * `aggregate`  – the in-memory aggregate-root state machine
//! * `mapper`     – event ⇄ sequenced-record conversion
//! * `store`      – record-manager trait and the event store
//! * `repository` – rehydration by left-folding stored events
//! * `bus`        – synchronous post-commit publication to subscribers
//!
//! ## Write and read paths
//!
//! Writes flow downward: an [`AggregateRoot`] buffers events triggered on it,
//! and `save` appends them through the [`EventStore`] to the record manager,
//! then publishes the batch through the [`SubscriberHub`]. Reads flow upward:
//! the [`Repository`] streams records back out of the store and folds them
//! through each event's mutate function, re-verifying the hash chain as it
//! goes.

pub mod aggregate;
pub mod bus;
pub mod error;
pub mod event;
pub mod hash;
pub mod mapper;
pub mod repository;
pub mod store;
pub mod topic;

pub use aggregate::{AggregateRoot, AggregateState};
pub use bus::{Subscriber, SubscriberHub};
pub use error::{Result, SourcingError};
pub use event::{DomainEvent, EventPayload};
pub use hash::{canonical_bytes, chain_hash, EventDigest};
pub use mapper::{Codec, SequencedItemMapper};
pub use repository::Repository;
pub use store::{EventStore, ReadOptions, RecordManager, SequencedRecord, DEFAULT_PAGE_SIZE};
pub use topic::{
    register_alias, register_family, reset_topics, resolve_family, topic_of, AggregateFamily,
    ATTRIBUTE_CHANGED_TOPIC, CREATED_TOPIC, DISCARDED_TOPIC,
};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        canonical_bytes, chain_hash, register_alias, register_family, reset_topics,
        resolve_family, topic_of, AggregateFamily, AggregateRoot, AggregateState, Codec,
        DomainEvent, EventDigest, EventPayload, EventStore, ReadOptions, RecordManager,
        Repository, Result, SequencedItemMapper, SequencedRecord, SourcingError, Subscriber,
        SubscriberHub, ATTRIBUTE_CHANGED_TOPIC, CREATED_TOPIC, DEFAULT_PAGE_SIZE,
        DISCARDED_TOPIC,
    };
}
