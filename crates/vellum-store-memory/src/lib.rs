#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **vellum-store-memory** – In-memory record-manager driver for Vellum.
//!
//! A fast, non-persistent [`RecordManager`] suitable for tests, development,
//! and as the reference implementation of the optimistic-concurrency
//! contract. All records live in process memory and are lost when the
//! process terminates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use vellum_core::error::{Result, SourcingError};
use vellum_core::store::{RecordManager, SequencedRecord};
use vellum_core::topic::DISCARDED_TOPIC;

//─────────────────────────────
//  In-memory record manager
//─────────────────────────────

#[derive(Debug, Default)]
struct SequenceSlot {
    /// Records in position order; appends keep the sequence contiguous.
    records: Vec<SequencedRecord>,
    /// Tombstone set when a discard record lands. Reads return empty and
    /// every further append is rejected.
    discarded: bool,
}

/// An in-memory, non-persistent record manager.
///
/// Safe for concurrent use across aggregates: sequences live behind a single
/// `RwLock`, and the position check plus the write happen under one write
/// guard, which is what makes the optimistic-concurrency contract hold —
/// exactly one of two racing writers at the same position wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordManager {
    sequences: Arc<RwLock<HashMap<Uuid, SequenceSlot>>>,
}

impl MemoryRecordManager {
    /// Creates a new, empty record manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known sequences, tombstoned ones included.
    pub async fn sequence_count(&self) -> usize {
        self.sequences.read().await.len()
    }

    /// Total number of stored records across all sequences.
    pub async fn record_count(&self) -> usize {
        self.sequences
            .read()
            .await
            .values()
            .map(|slot| slot.records.len())
            .sum()
    }

    /// Drop every sequence and tombstone. Test/dev helper.
    pub async fn clear(&self) {
        self.sequences.write().await.clear();
    }
}

#[async_trait]
impl RecordManager for MemoryRecordManager {
    async fn append(
        &self,
        record: SequencedRecord,
        expected_position: Option<u64>,
        new_position: u64,
    ) -> Result<()> {
        let sequence_id = record.sequence_id;
        let conflict = |detail: String| {
            tracing::warn!(%sequence_id, position = new_position, %detail, "append conflict");
            SourcingError::Concurrency {
                sequence_id,
                position: new_position,
                detail,
            }
        };

        let mut sequences = self.sequences.write().await;
        let slot = sequences.entry(sequence_id).or_default();

        if slot.discarded {
            return Err(conflict("sequence has been discarded".into()));
        }

        let current_top = slot.records.last().map(|r| r.position);
        match expected_position {
            None => {
                if current_top.is_some() {
                    return Err(conflict("position 0 already stored".into()));
                }
                if new_position != 0 {
                    return Err(conflict(format!(
                        "expected creation at position 0, got {new_position}"
                    )));
                }
            }
            Some(expected) => match current_top {
                Some(top) if top == expected => {
                    if new_position != expected + 1 {
                        return Err(conflict(format!(
                            "append at {new_position} would leave a gap after {expected}"
                        )));
                    }
                }
                Some(top) if top >= new_position => {
                    return Err(conflict(format!("position {new_position} already stored")));
                }
                _ => {
                    return Err(conflict(format!("position {expected} not yet stored")));
                }
            },
        }

        if record.topic == DISCARDED_TOPIC {
            // Terminal: wipe the history and tombstone the sequence.
            slot.records.clear();
            slot.discarded = true;
        } else {
            slot.records.push(record);
        }
        Ok(())
    }

    async fn read(
        &self,
        sequence_id: Uuid,
        after: Option<u64>,
        until: Option<u64>,
        limit: Option<usize>,
        ascending: bool,
    ) -> Result<Vec<SequencedRecord>> {
        let sequences = self.sequences.read().await;
        let Some(slot) = sequences.get(&sequence_id) else {
            return Ok(Vec::new());
        };

        // Bounds follow the read direction: ascending takes `after` as
        // exclusive and `until` as inclusive, descending flips both.
        let keep = |position: u64| {
            if ascending {
                after.map_or(true, |a| position > a) && until.map_or(true, |u| position <= u)
            } else {
                after.map_or(true, |a| position >= a) && until.map_or(true, |u| position < u)
            }
        };

        let mut matches = Vec::new();
        let records: Box<dyn Iterator<Item = &SequencedRecord>> = if ascending {
            Box::new(slot.records.iter())
        } else {
            Box::new(slot.records.iter().rev())
        };
        for record in records {
            if limit.is_some_and(|l| matches.len() >= l) {
                break;
            }
            if keep(record.position) {
                matches.push(record.clone());
            }
        }
        Ok(matches)
    }

    async fn most_recent(
        &self,
        sequence_id: Uuid,
        until: Option<u64>,
    ) -> Result<Option<SequencedRecord>> {
        let sequences = self.sequences.read().await;
        Ok(sequences.get(&sequence_id).and_then(|slot| {
            slot.records
                .iter()
                .rev()
                .find(|r| until.map_or(true, |u| r.position <= u))
                .cloned()
        }))
    }

    async fn remove(&self, sequence_id: Uuid) -> Result<()> {
        self.sequences.write().await.remove(&sequence_id);
        Ok(())
    }
}
