//! Typed error surface shared across the engine.
//!
//! Errors fall into two tiers. *Integrity* errors (`EventHash`, `HeadHash`,
//! `TopicResolution`, `CorruptStream`) indicate data corruption or schema
//! drift and must never be retried. *Contention* errors (`Concurrency`) are
//! expected under load and are surfaced unchanged; callers typically drop the
//! in-memory replica, rehydrate through the repository, and re-apply their
//! command. Backend failures pass through opaquely.

use uuid::Uuid;

/// Engine-wide result alias.
pub type Result<T> = std::result::Result<T, SourcingError>;

/// Errors surfaced by the event-sourcing engine.
#[derive(Debug, thiserror::Error)]
pub enum SourcingError {
    /// Optimistic write conflict or position gap on a sequence.
    #[error("concurrency conflict on sequence {sequence_id} at position {position}: {detail}")]
    Concurrency {
        /// Sequence the conflicting write targeted.
        sequence_id: Uuid,
        /// Position the conflicting write targeted.
        position: u64,
        /// What the record manager observed.
        detail: String,
    },

    /// Stored event content does not match its recorded hash.
    #[error("event hash mismatch for {originator_id} at version {originator_version}")]
    EventHash {
        /// Aggregate the damaged event belongs to.
        originator_id: Uuid,
        /// Version of the damaged event.
        originator_version: u64,
    },

    /// An event's previous hash does not match the head of the state it is
    /// being applied to.
    #[error("head hash mismatch applying version {originator_version} to {originator_id}")]
    HeadHash {
        /// Aggregate the event was applied to.
        originator_id: Uuid,
        /// Version of the rejected event.
        originator_version: u64,
    },

    /// No aggregate exists for the given id (never created, or discarded).
    #[error("no aggregate found for id {0}")]
    NotFound(Uuid),

    /// A topic string does not resolve to a registered definition.
    #[error("unknown topic '{0}'")]
    TopicResolution(String),

    /// A topic was re-registered with a conflicting definition.
    #[error("topic '{0}' is already registered with a different definition")]
    TopicConflict(String),

    /// The aggregate has been discarded; no further events may be triggered.
    #[error("aggregate {0} is discarded")]
    AggregateDiscarded(Uuid),

    /// An event sequence violates the chain protocol (wrong originator,
    /// creation event applied to live state, event after discard, ...).
    #[error("corrupt event stream: {0}")]
    CorruptStream(String),

    /// Event (de)serialization failure.
    #[error("codec failure: {0}")]
    Codec(String),

    /// A registered subscriber failed while handling a committed batch. The
    /// store commit stands.
    #[error("event publication failed: {0}")]
    Publish(#[source] anyhow::Error),

    /// Opaque backend failure, passed through unclassified.
    #[error("backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SourcingError {
    /// True for optimistic-concurrency conflicts, the only errors a caller
    /// may sensibly retry (after rehydrating).
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// True for errors that indicate corrupted or drifted data. These must
    /// bubble to the caller and are never retried.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::EventHash { .. }
                | Self::HeadHash { .. }
                | Self::TopicResolution(_)
                | Self::CorruptStream(_)
        )
    }
}
