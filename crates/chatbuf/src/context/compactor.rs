//! Rolling summary compaction.
//!
//! Once the hidden, non-summary part of the log costs more than the trigger,
//! everything hidden since the last compaction is sent to the summarization
//! service together with the previous summary. The result replaces the single
//! summary record in place and the originals are deleted. Because the previous
//! summary is always folded in, nothing is dropped across compactions: each
//! new summary covers "previous summary + everything hidden since".
//!
//! Compaction is split into three phases so that the suspension point never
//! holds the log:
//!
//! 1. [`Compactor::begin`] checks the trigger and guards, then snapshots the
//!    inputs into a [`CompactionJob`].
//! 2. [`CompactionJob::summarize`] performs the (one or two) service calls on
//!    that immutable snapshot.
//! 3. [`Compactor::finish`] applies the result, or leaves state untouched on
//!    failure.

use crate::api::{SummaryItem, SummaryRequest, Summarizer};
use crate::context::log::MessageLog;
use crate::sync::SyncQueue;
use crate::{RecordId, Role, epoch_millis};
use tracing::{debug, info, warn};

/// Default hidden-cost level that starts a compaction.
pub const DEFAULT_TRIGGER_TOKENS: usize = 2_000;

/// Default requested summary length, in characters.
pub const DEFAULT_TARGET_CHARS: usize = 1_200;

/// Default summary length above which a second, compress-only pass runs.
pub const DEFAULT_RECOMPRESS_CHARS: usize = 1_600;

/// Configuration for summary compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    /// Compaction starts when hidden, non-summary cost exceeds this.
    pub trigger_tokens: usize,
    /// Maximum characters requested from the summarizer.
    pub target_chars: usize,
    /// Summaries longer than this get a second compression pass.
    pub recompress_chars: usize,
    /// Language the summary should be written in.
    pub language: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            trigger_tokens: DEFAULT_TRIGGER_TOKENS,
            target_chars: DEFAULT_TARGET_CHARS,
            recompress_chars: DEFAULT_RECOMPRESS_CHARS,
            language: "English".to_string(),
        }
    }
}

impl CompactionConfig {
    pub fn with_trigger_tokens(mut self, tokens: usize) -> Self {
        self.trigger_tokens = tokens;
        self
    }

    pub fn with_target_chars(mut self, chars: usize) -> Self {
        self.target_chars = chars;
        self
    }

    pub fn with_recompress_chars(mut self, chars: usize) -> Self {
        self.recompress_chars = chars;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Immutable snapshot of one compaction's inputs.
#[derive(Debug, Clone)]
pub struct CompactionJob {
    /// Hidden, non-summary records with text, in append order.
    pub items: Vec<SummaryItem>,
    /// Text of the summary being rolled forward ("" if none).
    pub previous_summary: String,
    /// Every hidden, non-summary record at the time the job started. Exactly
    /// these are deleted on success.
    pub compacted: Vec<RecordId>,
    /// Hidden cost that triggered this job.
    pub hidden_cost: usize,
    language: String,
    target_chars: usize,
    recompress_chars: usize,
}

impl CompactionJob {
    fn request(&self, items: Vec<SummaryItem>, previous_summary: String) -> SummaryRequest {
        SummaryRequest {
            items,
            previous_summary,
            language: self.language.clone(),
            max_chars: self.target_chars,
        }
    }

    /// Run the summarization service over this snapshot.
    ///
    /// Fails when the first call fails or returns blank text. A result longer
    /// than the recompress threshold is sent back alone for a second pass;
    /// the second result replaces the first only if it is non-blank.
    pub async fn summarize(&self, summarizer: &dyn Summarizer) -> Result<String, String> {
        let first = summarizer
            .summarize(self.request(self.items.clone(), self.previous_summary.clone()))
            .await?;
        let first = first.trim();
        if first.is_empty() {
            return Err("summarizer returned no text".to_string());
        }

        let first_len = first.chars().count();
        if first_len <= self.recompress_chars {
            return Ok(first.to_string());
        }

        debug!(
            "summary is {first_len} chars (> {}), recompressing",
            self.recompress_chars
        );
        match summarizer
            .summarize(self.request(Vec::new(), first.to_string()))
            .await
        {
            Ok(second) if !second.trim().is_empty() => Ok(second.trim().to_string()),
            Ok(_) => {
                warn!("recompression returned no text; keeping first summary");
                Ok(first.to_string())
            }
            Err(e) => {
                warn!("recompression failed: {e}; keeping first summary");
                Ok(first.to_string())
            }
        }
    }
}

/// What a successful compaction changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionApplied {
    /// The (new or updated) summary record.
    pub summary_id: RecordId,
    /// Records deleted from the log.
    pub removed: Vec<RecordId>,
}

/// Trigger and re-entrancy state for summary compaction.
#[derive(Debug)]
pub struct Compactor {
    config: CompactionConfig,
    /// A job has begun and not finished yet.
    in_flight: bool,
    /// Hidden cost at the last attempt; an unchanged total is not retried.
    last_attempt_cost: Option<usize>,
    /// Number of successful compactions.
    compaction_count: usize,
}

impl Compactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            in_flight: false,
            last_attempt_cost: None,
            compaction_count: 0,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn compaction_count(&self) -> usize {
        self.compaction_count
    }

    /// Whether [`begin`](Self::begin) would start a job right now.
    pub fn should_compact(&self, log: &MessageLog) -> bool {
        let cost = log.hidden_cost();
        cost > self.config.trigger_tokens && !self.in_flight && self.last_attempt_cost != Some(cost)
    }

    /// Start a compaction if the trigger fires and no guard blocks it.
    ///
    /// Returns `None` when below the trigger, while another job is in flight,
    /// when the hidden cost is unchanged since the last attempt, or when no
    /// hidden record has text to summarize.
    pub fn begin(&mut self, log: &MessageLog) -> Option<CompactionJob> {
        if !self.should_compact(log) {
            return None;
        }
        let hidden_cost = log.hidden_cost();
        self.last_attempt_cost = Some(hidden_cost);

        let compacted: Vec<RecordId> = log
            .all()
            .iter()
            .filter(|r| r.is_compactable())
            .map(|r| r.id)
            .collect();
        let items: Vec<SummaryItem> = log
            .all()
            .iter()
            .filter(|r| r.is_compactable() && !r.text.trim().is_empty())
            .map(|r| SummaryItem {
                role: match r.role {
                    Role::User => Role::User,
                    Role::Assistant | Role::System => Role::Assistant,
                },
                text: r.text.clone(),
                ts: r.timestamp,
            })
            .collect();

        if items.is_empty() {
            debug!("compaction skipped: hidden records carry no text");
            return None;
        }

        self.in_flight = true;
        info!(
            "compaction started: {} hidden record(s), ~{hidden_cost} tokens",
            compacted.len()
        );
        Some(CompactionJob {
            items,
            previous_summary: log
                .latest_summary()
                .map(|s| s.text.clone())
                .unwrap_or_default(),
            compacted,
            hidden_cost,
            language: self.config.language.clone(),
            target_chars: self.config.target_chars,
            recompress_chars: self.config.recompress_chars,
        })
    }

    /// Apply a job's result.
    ///
    /// On success the summary record is replaced (or created) and enqueued,
    /// and exactly the job's snapshot of hidden records is deleted from the
    /// log and from the queue. On failure nothing changes; the next trigger
    /// retries.
    pub fn finish(
        &mut self,
        log: &mut MessageLog,
        queue: &mut SyncQueue,
        job: CompactionJob,
        result: Result<String, String>,
    ) -> Option<CompactionApplied> {
        self.in_flight = false;
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    "summarization failed: {e}; {} hidden record(s) kept for the next attempt",
                    job.compacted.len()
                );
                return None;
            }
        };

        // Hidden cost restarts from zero; a later total equal to this one is new
        // material, not a repeat of this attempt.
        self.last_attempt_cost = None;
        let summary_id = log.upsert_summary(summary, epoch_millis());
        queue.enqueue_once(log, summary_id);
        queue.forget(&job.compacted);
        let removed_count = log.remove_compacted(&job.compacted);
        self.compaction_count += 1;

        info!(
            "compaction #{} applied: {removed_count} record(s) folded into summary {summary_id}",
            self.compaction_count
        );
        Some(CompactionApplied {
            summary_id,
            removed: job.compacted,
        })
    }
}
