//! Client-resident conversation buffer for chat interfaces.
//!
//! `chatbuf` keeps the conversation exchanged with a remote assistant in an
//! in-memory log, holds the portion sent to the assistant under a fixed token
//! budget, folds overflow into a single rolling summary, and makes sure every
//! locally created or mutated record eventually reaches the persistence
//! backend, even when the client is torn down mid-flight.
//!
//! The core abstraction is the [`ChatSession`](session::ChatSession): one
//! explicit, session-scoped context object that owns the
//! [`MessageLog`](context::MessageLog), the [`SyncQueue`](sync::SyncQueue), and
//! the [`Compactor`](context::Compactor) state. A thin adapter (terminal loop,
//! browser bridge, test) calls its event methods; nothing in the core knows
//! about DOMs, sockets, or timers.
//!
//! # Getting started
//!
//! ```ignore
//! use chatbuf::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let backend = HttpBackend::new("http://127.0.0.1:3001")?;
//!     let mut session = ChatSession::new("demo", WindowConfig::default())
//!         .with_delivery(BeaconChannel::new(&backend));
//!
//!     session.load(&backend).await;
//!     session.submit("Hello!", &backend, &backend, &backend).await;
//!
//!     for line in session.view() {
//!         println!("{}", line.render());
//!     }
//!     session.on_teardown(TeardownReason::Exit);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimator, message log, budget enforcer, summary compactor |
//! | [`sync`] | Durable-delivery queue of not-yet-persisted records |
//! | [`view`] | Turn grouping for presentation |
//! | [`session`] | [`ChatSession`](session::ChatSession) event-driven context object |
//! | [`api`] | Collaborator traits and their HTTP implementations |
//! | [`config`] | [`WindowConfig`](config::WindowConfig) constants |
//!
//! # Invariants
//!
//! 1. At most one record carries [`RecordKind::Summary`], and it is always
//!    hidden.
//! 2. A record only ever moves from visible to hidden, never back.
//! 3. Compaction deletes only hidden, non-summary records.
//! 4. The log is append-ordered and never re-sorted.

pub mod api;
pub mod config;
pub mod context;
pub mod prelude;
pub mod session;
pub mod sync;
pub mod view;

use serde::{Deserialize, Serialize};

// ── Record identity ────────────────────────────────────────────────

/// Stable identifier of a record in the [`MessageLog`](context::MessageLog).
///
/// Assigned by the log on append, carried on the wire so the backend can
/// upsert, and used by the [`SyncQueue`](sync::SyncQueue) instead of live
/// references.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Record types ───────────────────────────────────────────────────

/// Author of a record. `System` is reserved for the summary record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Optional record tag. The only recognized kind is the rolling summary.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Summary,
}

/// A single entry in the conversation log.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRecord {
    pub id: RecordId,
    pub role: Role,
    pub text: String,
    /// Creation time, unix epoch milliseconds.
    pub timestamp: i64,
    /// Excluded from the view and from the budgeted context.
    pub hidden: bool,
    pub kind: Option<RecordKind>,
    /// The backend holds an up-to-date copy.
    pub persisted: bool,
    /// Currently tracked by the sync queue.
    pub queued: bool,
}

impl MessageRecord {
    /// Whether this is the rolling summary record.
    pub fn is_summary(&self) -> bool {
        self.kind == Some(RecordKind::Summary)
    }

    /// Visible, non-summary: part of the view and of the budgeted context.
    pub fn is_visible(&self) -> bool {
        !self.hidden && !self.is_summary()
    }

    /// Hidden, non-summary: compaction input.
    pub fn is_compactable(&self) -> bool {
        self.hidden && !self.is_summary()
    }

    /// Wire representation sent to the backend and the assistant.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            id: Some(self.id),
            role: self.role,
            text: self.text.clone(),
            ts: self.timestamp,
            hidden: self.hidden,
            kind: self.kind,
        }
    }
}

/// JSON shape of a record exchanged with the backend.
///
/// `id` is optional on input so that history written by older clients (or
/// by hand) still loads; the log assigns fresh ids to such items.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecordKind>,
}

impl WireMessage {
    pub fn is_summary(&self) -> bool {
        self.kind == Some(RecordKind::Summary)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Current unix epoch in milliseconds.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Derive a conversation space from a page path: the last non-empty path
/// segment, or `"unknown"` when there is none.
///
/// `/test` → `"test"`, `/chat/monday/` → `"monday"`, `/` → `"unknown"`.
pub fn space_from_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .unwrap_or("unknown")
        .to_string()
}
