//! The ordered message log: the session's system of record.
//!
//! Records are only ever appended, hidden, or (during compaction) deleted.
//! Every query scans the current records, so a read always reflects the most
//! recent mutation.

use crate::context::estimate::estimate_tokens;
use crate::{MessageRecord, RecordId, RecordKind, Role, WireMessage, epoch_millis};
use tracing::{debug, warn};

/// Append-ordered sequence of [`MessageRecord`]s.
#[derive(Debug, Default)]
pub struct MessageLog {
    records: Vec<MessageRecord>,
    next_id: u64,
    /// Timestamp of the newest record, used to keep new timestamps
    /// non-decreasing even if the wall clock steps back.
    last_timestamp: i64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly created, visible record stamped with the current time.
    pub fn append(&mut self, role: Role, text: impl Into<String>) -> RecordId {
        self.append_at(role, text, epoch_millis())
    }

    /// Append a newly created, visible record with an explicit timestamp.
    ///
    /// The timestamp is clamped so it never precedes the previous record.
    pub fn append_at(&mut self, role: Role, text: impl Into<String>, timestamp: i64) -> RecordId {
        let id = self.allocate_id();
        let timestamp = self.monotonic(timestamp);
        self.records.push(MessageRecord {
            id,
            role,
            text: text.into(),
            timestamp,
            hidden: false,
            kind: None,
            persisted: false,
            queued: false,
        });
        id
    }

    /// Load records returned by the backend, in the backend's order.
    ///
    /// Loaded records are already persisted and keep their original
    /// timestamps. Summary items are forced hidden; if more than one arrives
    /// the last one wins. A summary stored visible is marked unpersisted so
    /// the corrected flag is written back. Returns the number of records
    /// added.
    pub fn restore(&mut self, items: impl IntoIterator<Item = WireMessage>) -> usize {
        let mut loaded = 0;
        for item in items {
            let id = match item.id {
                Some(id) if self.get(id).is_none() => {
                    self.next_id = self.next_id.max(id.0 + 1);
                    id
                }
                Some(id) => {
                    warn!("duplicate record id {id} in history; assigning a fresh id");
                    self.allocate_id()
                }
                None => self.allocate_id(),
            };

            let is_summary = item.is_summary();
            if is_summary && let Some(pos) = self.records.iter().position(|r| r.is_summary()) {
                warn!("more than one summary in history; keeping the latest");
                self.records.remove(pos);
            }

            let forced_hidden = is_summary && !item.hidden;
            self.last_timestamp = self.last_timestamp.max(item.ts);
            self.records.push(MessageRecord {
                id,
                role: item.role,
                text: item.text,
                timestamp: item.ts,
                hidden: item.hidden || is_summary,
                kind: item.kind,
                persisted: !forced_hidden,
                queued: false,
            });
            loaded += 1;
        }
        debug!("restored {loaded} record(s), log now holds {}", self.records.len());
        loaded
    }

    // ── Queries ────────────────────────────────────────────────────

    /// The full ordered record set, hidden records and summary included.
    pub fn all(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&MessageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut MessageRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Visible, non-summary records in append order.
    pub fn visible_records(&self) -> Vec<&MessageRecord> {
        self.records.iter().filter(|r| r.is_visible()).collect()
    }

    /// The single summary record, if one exists.
    pub fn latest_summary(&self) -> Option<&MessageRecord> {
        self.records.iter().find(|r| r.is_summary())
    }

    /// Estimated cost of all visible records.
    pub fn visible_cost(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.is_visible())
            .map(|r| estimate_tokens(&r.text))
            .sum()
    }

    /// Estimated cost of the summary text, 0 without a summary.
    pub fn summary_cost(&self) -> usize {
        self.latest_summary()
            .map_or(0, |s| estimate_tokens(&s.text))
    }

    /// Estimated cost of hidden, non-summary records.
    pub fn hidden_cost(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.is_compactable())
            .map(|r| estimate_tokens(&r.text))
            .sum()
    }

    /// Wire form of every record, visible and hidden, in append order.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        self.records.iter().map(MessageRecord::to_wire).collect()
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Hide a record. One-way: hidden records never become visible again.
    ///
    /// Marks the record as locally mutated. Returns `true` if the record
    /// changed.
    pub fn hide(&mut self, id: RecordId) -> bool {
        match self.get_mut(id) {
            Some(record) if !record.hidden => {
                record.hidden = true;
                record.persisted = false;
                true
            }
            _ => false,
        }
    }

    /// Replace the summary text in place, or create the summary record if
    /// none exists. The summary is always hidden and marked unpersisted.
    pub fn upsert_summary(&mut self, text: impl Into<String>, timestamp: i64) -> RecordId {
        let timestamp = self.monotonic(timestamp);
        if let Some(summary) = self.records.iter_mut().find(|r| r.is_summary()) {
            summary.text = text.into();
            summary.timestamp = timestamp;
            summary.hidden = true;
            summary.persisted = false;
            return summary.id;
        }

        let id = self.allocate_id();
        self.records.push(MessageRecord {
            id,
            role: Role::System,
            text: text.into(),
            timestamp,
            hidden: true,
            kind: Some(RecordKind::Summary),
            persisted: false,
            queued: false,
        });
        id
    }

    /// Delete the given records. Only hidden, non-summary records are ever
    /// removed; other ids are ignored. Returns the number removed.
    pub fn remove_compacted(&mut self, ids: &[RecordId]) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| !(r.is_compactable() && ids.contains(&r.id)));
        before - self.records.len()
    }

    fn allocate_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    fn monotonic(&mut self, timestamp: i64) -> i64 {
        let ts = timestamp.max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }
}
