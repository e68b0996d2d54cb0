//! Convenience re-exports for common `chatbuf` types.
//!
//! Meant to be glob-imported by adapters:
//!
//! ```ignore
//! use chatbuf::prelude::*;
//! ```
//!
//! This pulls in the session, its configuration, the collaborator traits and
//! their HTTP implementations, and the view types. Lower-level pieces
//! (the compactor phases, budget enforcement, the raw sync queue) stay in
//! their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{MessageRecord, RecordId, RecordKind, Role, WireMessage, space_from_path};

// ── Session ─────────────────────────────────────────────────────────
pub use crate::config::WindowConfig;
pub use crate::session::{ChatSession, TeardownReason};
pub use crate::sync::FlushOutcome;
pub use crate::view::ViewLine;

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::api::{
    Assistant, BeaconChannel, Delivery, HistoryStore, HttpBackend, KeepaliveChannel,
    RetryConfig, Summarizer,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextBudget, ContextUsage};
