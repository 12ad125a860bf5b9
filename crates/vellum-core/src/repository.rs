//! Rehydration: reconstructing aggregates from their stored events.
//!
//! The repository is the only bridge from storage back to live state, and it
//! is transient per call: it streams an aggregate's events ascending (paged)
//! and left-folds them through their mutate functions. Every application
//! re-verifies the hash chain, so a tampered history cannot rehydrate.

use futures::TryStreamExt;
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::{Result, SourcingError};
use crate::event::EventPayload;
use crate::store::{EventStore, ReadOptions, RecordManager, DEFAULT_PAGE_SIZE};

/// Rehydrates aggregates from an event store.
#[derive(Debug, Clone)]
pub struct Repository<R> {
    store: EventStore<R>,
    page_size: usize,
}

impl<R: RecordManager> Repository<R> {
    /// A repository reading through `store` with the default page size.
    pub fn new(store: EventStore<R>) -> Self {
        Self::with_page_size(store, DEFAULT_PAGE_SIZE)
    }

    /// A repository with an explicit read page size.
    pub fn with_page_size(store: EventStore<R>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// The underlying event store.
    pub fn event_store(&self) -> &EventStore<R> {
        &self.store
    }

    /// Rehydrate the aggregate identified by `id`.
    ///
    /// Fails with [`SourcingError::NotFound`] when no creation event exists
    /// for `id` or when the history ends in a discard. Integrity failures
    /// ([`SourcingError::EventHash`], [`SourcingError::HeadHash`],
    /// [`SourcingError::TopicResolution`]) propagate as-is.
    pub async fn get(&self, id: Uuid) -> Result<AggregateRoot> {
        let opts = ReadOptions {
            page_size: Some(self.page_size),
            ..ReadOptions::default()
        };
        let stream = self.store.iter_events(id, opts);
        futures::pin_mut!(stream);

        let mut state: Option<AggregateRoot> = None;
        while let Some(event) = stream.try_next().await? {
            // The first event must be the creation event; anything else means
            // the aggregate is unknown here, not that the stream is corrupt.
            if state.is_none() && !matches!(event.payload(), EventPayload::Created { .. }) {
                return Err(SourcingError::NotFound(id));
            }
            state = event.mutate(state)?;
        }

        let state = state.ok_or(SourcingError::NotFound(id))?;
        if state.is_discarded() {
            return Err(SourcingError::NotFound(id));
        }
        Ok(state)
    }

    /// Whether an aggregate with `id` currently exists.
    ///
    /// `get` collapsed to a boolean: only [`SourcingError::NotFound`] maps to
    /// `false`; integrity and backend errors still propagate.
    pub async fn contains(&self, id: Uuid) -> Result<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(SourcingError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
