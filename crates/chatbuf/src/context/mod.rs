//! Context window management: estimation, the message log, budgets, and
//! summary compaction.
//!
//! The context sent to the assistant is a finite budget. This module keeps it
//! under control in two layers:
//!
//! 1. **[`budget`]** — [`enforce`] demotes the oldest visible records to
//!    hidden until visible history plus the summary fits the
//!    [`ContextBudget`]. No remote call needed.
//!
//! 2. **[`compactor`]** — once enough hidden history accumulates, the
//!    [`Compactor`] folds it, together with the previous summary, into one
//!    rolling summary record and deletes the originals.
//!
//! Both operate on the [`MessageLog`], the ordered system of record for the
//! session, and cost everything through [`estimate_tokens`].

pub mod budget;
pub mod compactor;
pub mod estimate;
pub mod log;

// Re-export commonly used items at the module level.
pub use budget::{ContextBudget, ContextUsage, Enforcement, enforce};
pub use compactor::{CompactionApplied, CompactionConfig, CompactionJob, Compactor};
pub use estimate::{CHARS_PER_TOKEN, estimate_tokens};
pub use log::MessageLog;
