//! Context budget enforcement: keeps visible history plus the running summary
//! under a fixed token ceiling.
//!
//! When the estimated cost of the visible records and the summary exceeds the
//! effective budget, the oldest visible records are demoted to hidden, one
//! whole record at a time, until the excess is covered. Hidden records leave
//! the context sent to the assistant but stay in the log as input for the
//! [`Compactor`](super::Compactor).

use crate::RecordId;
use crate::context::estimate::estimate_tokens;
use crate::context::log::MessageLog;
use crate::sync::SyncQueue;
use tracing::debug;

/// Default total token budget.
pub const DEFAULT_MAX_TOKENS: usize = 8_000;

/// Default tokens held back for the next reply.
pub const DEFAULT_RESERVED_TOKENS: usize = 1_000;

/// Token ceiling for visible history plus the summary.
///
/// # Example
///
/// ```
/// use chatbuf::context::ContextBudget;
///
/// let budget = ContextBudget::new(8_000, 1_000);
/// assert_eq!(budget.effective_max_tokens(), 7_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Total budget in estimated tokens.
    max_tokens: usize,
    /// Tokens kept free for the assistant's next reply.
    reserved_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS, DEFAULT_RESERVED_TOKENS)
    }
}

impl ContextBudget {
    pub fn new(max_tokens: usize, reserved_tokens: usize) -> Self {
        Self {
            max_tokens,
            reserved_tokens,
        }
    }

    /// Override the total budget.
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Override the reply reserve.
    pub fn with_reserved_tokens(mut self, tokens: usize) -> Self {
        self.reserved_tokens = tokens;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn reserved_tokens(&self) -> usize {
        self.reserved_tokens
    }

    /// Budget after the reply reserve, never below 1.
    pub fn effective_max_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens).max(1)
    }

    /// Estimate current usage of the log against this budget.
    pub fn estimate_usage(&self, log: &MessageLog) -> ContextUsage {
        let visible_tokens = log.visible_cost();
        let summary_tokens = log.summary_cost();
        let budget = self.effective_max_tokens();
        ContextUsage {
            visible_tokens,
            summary_tokens,
            budget,
            usage_pct: (visible_tokens + summary_tokens) as f64 / budget as f64,
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    /// Estimated tokens of visible, non-summary records.
    pub visible_tokens: usize,
    /// Estimated tokens of the summary text.
    pub summary_tokens: usize,
    /// Effective budget (after the reply reserve).
    pub budget: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn total_tokens(&self) -> usize {
        self.visible_tokens + self.summary_tokens
    }

    /// Whether visible history plus the summary fits the budget.
    pub fn fits(&self) -> bool {
        self.total_tokens() <= self.budget
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens visible + {} summary ({:.0}% of {})",
            self.visible_tokens,
            self.summary_tokens,
            self.usage_pct * 100.0,
            self.budget,
        )
    }
}

/// Result of one [`enforce`] pass.
#[derive(Debug, Clone)]
pub struct Enforcement {
    /// Records demoted to hidden, oldest first.
    pub hidden: Vec<RecordId>,
    /// Usage after enforcement.
    pub usage: ContextUsage,
}

/// Hide the oldest visible records until visible cost plus summary cost fits
/// the budget.
///
/// Each demoted record is marked mutated and enqueued once for sync. A record
/// larger than the whole budget is still hidden whole; no partial truncation.
/// Running it again without an intervening append changes nothing.
pub fn enforce(log: &mut MessageLog, queue: &mut SyncQueue, budget: &ContextBudget) -> Enforcement {
    let effective = budget.effective_max_tokens();
    let allowed = effective.saturating_sub(log.summary_cost());
    let visible_cost = log.visible_cost();

    let mut hidden = Vec::new();
    if visible_cost > allowed {
        let mut excess = visible_cost - allowed;

        // Oldest first: scan in append order and stop once covered.
        let candidates: Vec<(RecordId, usize)> = log
            .all()
            .iter()
            .filter(|r| r.is_visible())
            .map(|r| (r.id, estimate_tokens(&r.text)))
            .collect();

        for (id, cost) in candidates {
            if excess == 0 {
                break;
            }
            if log.hide(id) {
                queue.enqueue_once(log, id);
                hidden.push(id);
            }
            excess = excess.saturating_sub(cost);
        }
    }

    let usage = budget.estimate_usage(log);
    if !hidden.is_empty() {
        debug!(
            "budget: hid {} record(s); {}",
            hidden.len(),
            usage.to_log_string()
        );
    }
    Enforcement { hidden, usage }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    /// Text costing exactly `tokens` estimated tokens.
    fn text_of(tokens: usize) -> String {
        "x".repeat(tokens * 2)
    }

    fn filled_log(count: usize, tokens_each: usize) -> MessageLog {
        let mut log = MessageLog::new();
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            log.append(role, text_of(tokens_each));
        }
        log
    }

    #[test]
    fn effective_budget_subtracts_reserve() {
        let budget = ContextBudget::new(8_000, 1_000);
        assert_eq!(budget.effective_max_tokens(), 7_000);
    }

    #[test]
    fn effective_budget_never_below_one() {
        let budget = ContextBudget::new(500, 800);
        assert_eq!(budget.effective_max_tokens(), 1);
    }

    #[test]
    fn under_budget_is_noop() {
        let mut log = filled_log(4, 100);
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(1_000, 0));
        assert!(result.hidden.is_empty());
        assert!(queue.is_empty());
        assert_eq!(log.visible_records().len(), 4);
    }

    #[test]
    fn fifty_records_trimmed_to_budget() {
        // 50 records at 200 tokens = 10 000 visible, budget 7 000.
        let mut log = filled_log(50, 200);
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(8_000, 1_000));

        assert_eq!(result.hidden.len(), 15);
        assert_eq!(log.visible_records().len(), 35);
        assert!(result.usage.fits());
        assert_eq!(result.usage.visible_tokens, 7_000);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut log = filled_log(10, 100);
        let ids: Vec<RecordId> = log.all().iter().map(|r| r.id).collect();
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(700, 0));

        assert_eq!(result.hidden, ids[..3].to_vec());
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(log.get(*id).unwrap().hidden, i < 3);
        }
    }

    #[test]
    fn summary_cost_counts_against_budget() {
        let mut log = filled_log(4, 100);
        log.upsert_summary(text_of(150), 0);
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(400, 0));

        // allowed = 400 - 150 = 250, visible 400 → hide two records.
        assert_eq!(result.hidden.len(), 2);
        assert!(result.usage.total_tokens() <= 400);
    }

    #[test]
    fn oversized_summary_hides_everything_visible() {
        let mut log = filled_log(3, 10);
        log.upsert_summary(text_of(500), 0);
        let mut queue = SyncQueue::new();
        enforce(&mut log, &mut queue, &ContextBudget::new(400, 0));
        assert!(log.visible_records().is_empty());
    }

    #[test]
    fn single_oversized_record_is_hidden_whole() {
        let mut log = MessageLog::new();
        let id = log.append(Role::User, text_of(5_000));
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(1_000, 0));

        assert_eq!(result.hidden, vec![id]);
        assert_eq!(log.get(id).unwrap().text.len(), 10_000);
        assert!(result.usage.fits());
    }

    #[test]
    fn hidden_records_are_enqueued_once() {
        let mut log = filled_log(6, 100);
        let mut queue = SyncQueue::new();
        let result = enforce(&mut log, &mut queue, &ContextBudget::new(300, 0));

        assert_eq!(queue.len(), result.hidden.len());
        for id in &result.hidden {
            let rec = log.get(*id).unwrap();
            assert!(rec.queued);
            assert!(!rec.persisted);
        }
    }

    #[test]
    fn enforce_is_idempotent() {
        let mut log = filled_log(20, 100);
        let mut queue = SyncQueue::new();
        let budget = ContextBudget::new(1_050, 0);

        enforce(&mut log, &mut queue, &budget);
        let after_first: Vec<bool> = log.all().iter().map(|r| r.hidden).collect();
        let queued_first = queue.len();

        let second = enforce(&mut log, &mut queue, &budget);
        let after_second: Vec<bool> = log.all().iter().map(|r| r.hidden).collect();

        assert!(second.hidden.is_empty());
        assert_eq!(after_first, after_second);
        assert_eq!(queue.len(), queued_first);
    }

    #[test]
    fn usage_log_string_format() {
        let log = filled_log(2, 10);
        let usage = ContextBudget::default().estimate_usage(&log);
        let s = usage.to_log_string();
        assert!(s.contains("context:"));
        assert!(s.contains("of 7000"));
    }
}
