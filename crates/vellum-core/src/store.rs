//! The record-manager contract and the event store built on it.
//!
//! A [`RecordManager`] is the only I/O seam in the engine: an append-only
//! sink of `(sequence_id, position, topic, state)` records with a
//! per-sequence position constraint, and an ordered reader over them.
//! Drivers must preserve total order by position within a sequence; no
//! cross-sequence ordering is promised. The [`EventStore`] binds a driver to
//! a [`SequencedItemMapper`] and speaks domain events.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::event::DomainEvent;
use crate::mapper::SequencedItemMapper;

/// Page size used by readers that were not given one.
pub const DEFAULT_PAGE_SIZE: usize = 256;

//─────────────────────────────
//  Sequenced records
//─────────────────────────────

/// A storage record: what the record manager persists.
///
/// `(sequence_id, position)` is the primary key; `state` is the serialized,
/// hash-bearing event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedRecord {
    /// Sequence identifier (the originator id).
    pub sequence_id: Uuid,
    /// Position within the sequence (the originator version).
    pub position: u64,
    /// Topic of the event variant held in `state`.
    pub topic: String,
    /// Serialized event body, including both hashes.
    pub state: Vec<u8>,
}

//─────────────────────────────
//  Record-manager contract
//─────────────────────────────

/// Append-only, position-constrained record storage.
///
/// Range bounds follow the read direction: ascending reads take `after` as
/// exclusive and `until` as inclusive; descending reads flip both, which is
/// what lets a descending reader page with `until` as its cursor.
#[async_trait]
pub trait RecordManager: Send + Sync {
    /// Write `record` atomically against the per-sequence position check.
    ///
    /// Fails with [`SourcingError::Concurrency`] when another writer already
    /// stored `new_position`, or when `expected_position` (which is `None`
    /// only for position 0) is not the current top of the sequence — i.e.
    /// when admitting the record would create a gap.
    ///
    /// [`SourcingError::Concurrency`]: crate::error::SourcingError::Concurrency
    async fn append(
        &self,
        record: SequencedRecord,
        expected_position: Option<u64>,
        new_position: u64,
    ) -> Result<()>;

    /// Read records for a sequence within the given bounds, in the requested
    /// direction, up to `limit`.
    async fn read(
        &self,
        sequence_id: Uuid,
        after: Option<u64>,
        until: Option<u64>,
        limit: Option<usize>,
        ascending: bool,
    ) -> Result<Vec<SequencedRecord>>;

    /// The highest-position record at or below `until`, if any.
    async fn most_recent(
        &self,
        sequence_id: Uuid,
        until: Option<u64>,
    ) -> Result<Option<SequencedRecord>>;

    /// Erase all records for a sequence.
    async fn remove(&self, sequence_id: Uuid) -> Result<()>;
}

#[async_trait]
impl<M> RecordManager for Arc<M>
where
    M: RecordManager + ?Sized,
{
    async fn append(
        &self,
        record: SequencedRecord,
        expected_position: Option<u64>,
        new_position: u64,
    ) -> Result<()> {
        (**self).append(record, expected_position, new_position).await
    }

    async fn read(
        &self,
        sequence_id: Uuid,
        after: Option<u64>,
        until: Option<u64>,
        limit: Option<usize>,
        ascending: bool,
    ) -> Result<Vec<SequencedRecord>> {
        (**self).read(sequence_id, after, until, limit, ascending).await
    }

    async fn most_recent(
        &self,
        sequence_id: Uuid,
        until: Option<u64>,
    ) -> Result<Option<SequencedRecord>> {
        (**self).most_recent(sequence_id, until).await
    }

    async fn remove(&self, sequence_id: Uuid) -> Result<()> {
        (**self).remove(sequence_id).await
    }
}

//─────────────────────────────
//  Event store
//─────────────────────────────

/// Options for reading an event sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Lower position bound (exclusive ascending, inclusive descending).
    pub after: Option<u64>,
    /// Upper position bound (inclusive ascending, exclusive descending).
    pub until: Option<u64>,
    /// Maximum number of events to return.
    pub limit: Option<usize>,
    /// Read descending instead of ascending.
    pub descending: bool,
    /// Page size for lazy reads through [`EventStore::iter_events`].
    pub page_size: Option<usize>,
    /// Query descending and reverse the materialized slice. For backends
    /// that read sequence tails faster than heads; the return order is still
    /// ascending.
    pub short: bool,
}

/// Binds a record manager to a mapper and speaks domain events.
#[derive(Debug, Clone)]
pub struct EventStore<R> {
    records: R,
    mapper: SequencedItemMapper,
}

impl<R: RecordManager> EventStore<R> {
    /// An event store over `records` with the default mapper.
    pub fn new(records: R) -> Self {
        Self::with_mapper(records, SequencedItemMapper::default())
    }

    /// An event store with an explicit mapper (blob codec choice).
    pub fn with_mapper(records: R, mapper: SequencedItemMapper) -> Self {
        Self { records, mapper }
    }

    /// The underlying record manager.
    pub fn record_manager(&self) -> &R {
        &self.records
    }

    /// The configured mapper.
    pub fn mapper(&self) -> &SequencedItemMapper {
        &self.mapper
    }

    /// Append one event under optimistic concurrency control.
    ///
    /// The expected position is `version − 1` (`None` at version 0) and the
    /// new position is the event's version. Concurrency conflicts propagate
    /// unchanged; publication is not this method's concern — the aggregate
    /// publishes after its whole batch has committed.
    pub async fn append(&self, event: &DomainEvent) -> Result<()> {
        let new_position = event.originator_version();
        let expected_position = new_position.checked_sub(1);
        let record = self.mapper.to_record(event)?;
        tracing::debug!(
            originator_id = %event.originator_id(),
            version = new_position,
            topic = event.topic(),
            "appending event"
        );
        self.records.append(record, expected_position, new_position).await
    }

    /// Materialize events for `id` within `opts`.
    ///
    /// With `short` set, the query runs descending and the slice is reversed
    /// before deserialization; callers see ascending order either way.
    pub async fn read_events(&self, id: Uuid, opts: ReadOptions) -> Result<Vec<DomainEvent>> {
        let records = if opts.short && !opts.descending {
            let mut records = self
                .records
                .read(id, opts.after, opts.until, opts.limit, false)
                .await?;
            records.reverse();
            records
        } else {
            self.records
                .read(id, opts.after, opts.until, opts.limit, !opts.descending)
                .await?
        };
        records.iter().map(|r| self.mapper.from_record(r)).collect()
    }

    /// Lazily stream events for `id`, paging by `opts.page_size`.
    ///
    /// The stream is one-shot and never materializes the full history: each
    /// page is fetched when the previous one drains, and each record is
    /// deserialized as it is yielded. Without a page size the stream degrades
    /// to a single fetch.
    pub fn iter_events(
        &self,
        id: Uuid,
        opts: ReadOptions,
    ) -> impl Stream<Item = Result<DomainEvent>> + '_ {
        let page_size = opts.page_size.map(|p| p.max(1));
        let cursor = PageCursor {
            after: opts.after,
            until: opts.until,
            remaining: opts.limit,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        futures::stream::try_unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(record) = cursor.buffer.pop_front() {
                    let event = self.mapper.from_record(&record)?;
                    return Ok(Some((event, cursor)));
                }
                if cursor.exhausted || cursor.remaining == Some(0) {
                    return Ok(None);
                }

                let fetch = match (page_size, cursor.remaining) {
                    (Some(page), Some(remaining)) => Some(page.min(remaining)),
                    (Some(page), None) => Some(page),
                    (None, remaining) => remaining,
                };
                let records = self
                    .records
                    .read(id, cursor.after, cursor.until, fetch, !opts.descending)
                    .await?;

                let full_page = matches!(fetch, Some(wanted) if records.len() == wanted);
                if page_size.is_none() || !full_page {
                    cursor.exhausted = true;
                }
                if records.is_empty() {
                    continue;
                }
                if let Some(last) = records.last() {
                    if opts.descending {
                        cursor.until = Some(last.position);
                    } else {
                        cursor.after = Some(last.position);
                    }
                }
                if let Some(remaining) = cursor.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(records.len());
                }
                cursor.buffer.extend(records);
            }
        })
    }

    /// The most recent event at or below `until`, if any.
    pub async fn most_recent_event(
        &self,
        id: Uuid,
        until: Option<u64>,
    ) -> Result<Option<DomainEvent>> {
        match self.records.most_recent(id, until).await? {
            Some(record) => Ok(Some(self.mapper.from_record(&record)?)),
            None => Ok(None),
        }
    }
}

struct PageCursor {
    after: Option<u64>,
    until: Option<u64>,
    remaining: Option<usize>,
    buffer: VecDeque<SequencedRecord>,
    exhausted: bool,
}
