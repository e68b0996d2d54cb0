//! Configuration for a [`ChatSession`](crate::session::ChatSession).
//!
//! Every constant has a working default. Override individual values through
//! the builder methods:
//!
//! ```
//! use chatbuf::config::WindowConfig;
//! use std::time::Duration;
//!
//! let config = WindowConfig::default()
//!     .with_max_tokens(16_000)
//!     .with_recent_turns(5)
//!     .with_flush_interval(Duration::from_secs(10))
//!     .with_greeting("Hi! What are we working on?");
//!
//! assert_eq!(config.budget().effective_max_tokens(), 15_000);
//! ```

use crate::context::budget::{DEFAULT_MAX_TOKENS, DEFAULT_RESERVED_TOKENS};
use crate::context::compactor::{
    DEFAULT_RECOMPRESS_CHARS, DEFAULT_TARGET_CHARS, DEFAULT_TRIGGER_TOKENS,
};
use crate::context::{CompactionConfig, ContextBudget};
use std::time::Duration;

/// Default number of turns foregrounded in the view.
pub const DEFAULT_RECENT_TURNS: usize = 3;

/// Default interval between periodic sync flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Text shown in the summary panel before any summary exists.
pub const SUMMARY_PLACEHOLDER: &str = "(no summary yet)";

/// Constants governing one chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    /// Total token budget for visible history plus the summary.
    pub max_tokens: usize,
    /// Tokens subtracted from the budget to leave room for the next reply.
    pub reserved_tokens: usize,
    /// Hidden-cost level that starts a compaction.
    pub trigger_tokens: usize,
    /// Summary length requested from the summarization service.
    pub summary_target_chars: usize,
    /// Summary length above which a second compression pass runs.
    pub summary_recompress_chars: usize,
    /// Turns shown above the separator in the view.
    pub recent_turns: usize,
    /// Minimum time between periodic flushes.
    pub flush_interval: Duration,
    /// Language the summary is written in.
    pub language: String,
    /// Assistant message appended when a space has no history.
    pub greeting: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            reserved_tokens: DEFAULT_RESERVED_TOKENS,
            trigger_tokens: DEFAULT_TRIGGER_TOKENS,
            summary_target_chars: DEFAULT_TARGET_CHARS,
            summary_recompress_chars: DEFAULT_RECOMPRESS_CHARS,
            recent_turns: DEFAULT_RECENT_TURNS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            language: "English".to_string(),
            greeting: None,
        }
    }
}

impl WindowConfig {
    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_reserved_tokens(mut self, tokens: usize) -> Self {
        self.reserved_tokens = tokens;
        self
    }

    pub fn with_trigger_tokens(mut self, tokens: usize) -> Self {
        self.trigger_tokens = tokens;
        self
    }

    pub fn with_summary_target_chars(mut self, chars: usize) -> Self {
        self.summary_target_chars = chars;
        self
    }

    pub fn with_summary_recompress_chars(mut self, chars: usize) -> Self {
        self.summary_recompress_chars = chars;
        self
    }

    pub fn with_recent_turns(mut self, turns: usize) -> Self {
        self.recent_turns = turns;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// The token budget derived from this config.
    pub fn budget(&self) -> ContextBudget {
        ContextBudget::new(self.max_tokens, self.reserved_tokens)
    }

    /// The compaction settings derived from this config.
    pub fn compaction(&self) -> CompactionConfig {
        CompactionConfig::default()
            .with_trigger_tokens(self.trigger_tokens)
            .with_target_chars(self.summary_target_chars)
            .with_recompress_chars(self.summary_recompress_chars)
            .with_language(self.language.clone())
    }
}
