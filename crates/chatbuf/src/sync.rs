//! Durable-delivery queue for records the backend has not seen yet.
//!
//! The queue holds [`RecordId`]s, never copies of records: a batch is built
//! from the [`MessageLog`] at flush time, so any mutation made after enqueue
//! (a record being hidden, the summary text being replaced) is what gets
//! sent.
//!
//! Delivery is at-most-once and fire-and-forget. A flush offers the batch to
//! each [`Delivery`] channel in preference order; the first channel that
//! accepts it wins, and from then on the records count as persisted. There is
//! no acknowledgment tracking, so a crash between acceptance and arrival
//! loses that batch. The periodic flush bounds how much can be lost that way.

use crate::RecordId;
use crate::api::{Delivery, PersistBatch};
use crate::context::MessageLog;
use tracing::{debug, info, warn};

/// Ordered set of record ids awaiting persistence.
#[derive(Debug, Default)]
pub struct SyncQueue {
    ids: Vec<RecordId>,
}

/// Result of a [`SyncQueue::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// The named channel accepted a batch of `count` records.
    Dispatched { channel: String, count: usize },
    /// Every channel refused; the queue is kept for the next trigger.
    Refused { count: usize },
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Queued ids in enqueue order.
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    /// Track a record for persistence. A record already marked `queued` (or
    /// missing from the log) is not added again. Returns `true` if added.
    pub fn enqueue_once(&mut self, log: &mut MessageLog, id: RecordId) -> bool {
        let Some(record) = log.get_mut(id) else {
            return false;
        };
        if record.queued {
            return false;
        }
        record.queued = true;
        self.ids.push(id);
        true
    }

    /// Stop tracking records that are about to be deleted from the log.
    pub fn forget(&mut self, ids: &[RecordId]) {
        self.ids.retain(|id| !ids.contains(id));
    }

    /// Serialize the queued records as they currently stand in the log.
    ///
    /// Returns `None` when nothing queued is still present.
    pub fn build_batch(&self, log: &MessageLog, space: &str) -> Option<PersistBatch> {
        let messages: Vec<_> = self
            .ids
            .iter()
            .filter_map(|id| log.get(*id))
            .map(|r| r.to_wire())
            .collect();
        if messages.is_empty() {
            return None;
        }
        Some(PersistBatch {
            space: space.to_string(),
            messages,
        })
    }

    /// Mark every queued record persisted and clear the queue.
    pub fn acknowledge(&mut self, log: &mut MessageLog) {
        for id in self.ids.drain(..) {
            if let Some(record) = log.get_mut(id) {
                record.persisted = true;
                record.queued = false;
            }
        }
    }

    /// Offer the queued records to `channels` in order, clearing the queue on
    /// the first acceptance.
    pub fn flush(
        &mut self,
        log: &mut MessageLog,
        space: &str,
        channels: &[Box<dyn Delivery>],
    ) -> FlushOutcome {
        let Some(batch) = self.build_batch(log, space) else {
            // Only stale ids (deleted records) were left.
            self.ids.clear();
            return FlushOutcome::Empty;
        };
        let count = batch.messages.len();

        for channel in channels {
            if channel.dispatch(&batch) {
                info!(
                    "sync: {} accepted {count} record(s) for space {space}",
                    channel.name()
                );
                self.acknowledge(log);
                return FlushOutcome::Dispatched {
                    channel: channel.name().to_string(),
                    count,
                };
            }
            debug!("sync: {} refused batch, trying next channel", channel.name());
        }

        warn!("sync: no channel accepted {count} record(s); keeping them queued");
        FlushOutcome::Refused { count }
    }
}
