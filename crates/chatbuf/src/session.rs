//! The session-scoped context object.
//!
//! A [`ChatSession`] owns everything one conversation needs: the message log,
//! the sync queue, the compactor state, and the delivery channels. Adapters
//! drive it through event methods and never touch the parts directly:
//!
//! | Event | Method |
//! |-------|--------|
//! | history loaded | [`ChatSession::load_and_compact`] / [`ChatSession::restore`] |
//! | user submits | [`ChatSession::begin_turn`] |
//! | assistant replies | [`ChatSession::finish_turn`] |
//! | timer tick | [`ChatSession::on_tick`] |
//! | visibility loss, unload, exit | [`ChatSession::on_teardown`] |
//!
//! Remote calls take owned snapshots ([`AskRequest`], [`CompactionJob`]), so
//! a driver that needs the session during a call can split each turn into
//! its `begin_*` and `finish_*` halves. [`ChatSession::submit`] is the simple
//! sequential driver that does all of it in one await.

use crate::api::{AskRequest, Assistant, Delivery, HistoryStore, PurgeRequest, Summarizer};
use crate::config::{SUMMARY_PLACEHOLDER, WindowConfig};
use crate::context::{
    CompactionApplied, CompactionJob, Compactor, ContextBudget, ContextUsage, MessageLog, enforce,
};
use crate::sync::{FlushOutcome, SyncQueue};
use crate::view::{ViewLine, build_view};
use crate::{RecordId, Role, WireMessage};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why the client is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The page or window lost visibility.
    Hidden,
    /// The page is being hidden for navigation.
    PageHide,
    /// The page is unloading.
    Unload,
    /// The process is exiting.
    Exit,
}

impl std::fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TeardownReason::Hidden => "hidden",
            TeardownReason::PageHide => "pagehide",
            TeardownReason::Unload => "unload",
            TeardownReason::Exit => "exit",
        };
        f.write_str(s)
    }
}

/// One active conversation.
pub struct ChatSession {
    space: String,
    config: WindowConfig,
    budget: ContextBudget,
    log: MessageLog,
    queue: SyncQueue,
    compactor: Compactor,
    deliveries: Vec<Box<dyn Delivery>>,
    last_flush: Instant,
    ai_label: Option<String>,
    session_id: Option<String>,
}

impl ChatSession {
    pub fn new(space: impl Into<String>, config: WindowConfig) -> Self {
        Self {
            space: space.into(),
            budget: config.budget(),
            compactor: Compactor::new(config.compaction()),
            config,
            log: MessageLog::new(),
            queue: SyncQueue::new(),
            deliveries: Vec::new(),
            last_flush: Instant::now(),
            ai_label: None,
            session_id: None,
        }
    }

    /// Add a delivery channel. Channels are tried in the order added.
    pub fn with_delivery(mut self, channel: impl Delivery + 'static) -> Self {
        self.deliveries.push(Box::new(channel));
        self
    }

    /// Select the backend's system prompt for this conversation.
    pub fn with_ai_label(mut self, label: impl Into<String>) -> Self {
        self.ai_label = Some(label.into());
        self
    }

    /// Attach a backend session so its facts reach the assistant.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn space(&self) -> &str {
        &self.space
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn compactor(&self) -> &Compactor {
        &self.compactor
    }

    pub fn usage(&self) -> ContextUsage {
        self.budget.estimate_usage(&self.log)
    }

    // ── History ────────────────────────────────────────────────────

    /// Load stored history into the log.
    ///
    /// When nothing was stored and a greeting is configured, the greeting is
    /// appended as a new assistant record. Returns the number of records
    /// loaded from `items`.
    pub fn restore(&mut self, items: Vec<WireMessage>) -> usize {
        let loaded = self.log.restore(items);
        // Records corrected on load (a summary stored visible) go back out.
        let corrected: Vec<RecordId> = self
            .log
            .all()
            .iter()
            .filter(|r| !r.persisted)
            .map(|r| r.id)
            .collect();
        for id in corrected {
            self.queue.enqueue_once(&mut self.log, id);
        }
        if self.log.is_empty()
            && let Some(greeting) = self.config.greeting.clone()
        {
            let id = self.log.append(Role::Assistant, greeting);
            self.queue.enqueue_once(&mut self.log, id);
        }
        self.enforce_budget();
        loaded
    }

    /// Fetch this space's history from `store` and restore it.
    ///
    /// A failed fetch is logged and treated as empty history.
    pub async fn load(&mut self, store: &dyn HistoryStore) -> usize {
        let items = match store.load_history(&self.space).await {
            Ok(items) => items,
            Err(e) => {
                warn!("history load failed for space {}: {e}; starting empty", self.space);
                Vec::new()
            }
        };
        let loaded = self.restore(items);
        info!(
            "space {}: loaded {loaded} record(s); {}",
            self.space,
            self.usage().to_log_string()
        );
        loaded
    }

    /// [`load`](Self::load), then compact if the restored history already
    /// crosses the trigger.
    pub async fn load_and_compact(
        &mut self,
        store: &dyn HistoryStore,
        summarizer: &dyn Summarizer,
    ) -> usize {
        let loaded = self.load(store).await;
        self.maybe_compact(summarizer, store).await;
        loaded
    }

    // ── Turns ──────────────────────────────────────────────────────

    /// Record a user prompt and build the assistant request.
    ///
    /// The request carries the log as it stood before the prompt was
    /// appended, hidden records and summary included. Blank input is
    /// ignored.
    pub fn begin_turn(&mut self, text: &str) -> Option<AskRequest> {
        let prompt = text.trim();
        if prompt.is_empty() {
            return None;
        }
        let history = self.log.to_wire();
        let id = self.log.append(Role::User, prompt);
        self.queue.enqueue_once(&mut self.log, id);
        self.enforce_budget();

        Some(AskRequest {
            prompt: prompt.to_string(),
            history,
            ai_label: self.ai_label.clone(),
            session_id: self.session_id.clone(),
        })
    }

    /// Record the assistant's answer.
    ///
    /// A failed call becomes a visible assistant record reading
    /// `Error: <message>`, accounted like any other reply.
    pub fn finish_turn(&mut self, reply: Result<String, String>) -> RecordId {
        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!("assistant call failed: {e}");
                format!("Error: {e}")
            }
        };
        let id = self.log.append(Role::Assistant, text);
        self.queue.enqueue_once(&mut self.log, id);
        self.enforce_budget();
        id
    }

    /// Run a full turn: prompt, assistant call, reply, compaction.
    ///
    /// Returns the id of the reply record, or `None` for blank input.
    pub async fn submit(
        &mut self,
        text: &str,
        assistant: &dyn Assistant,
        summarizer: &dyn Summarizer,
        store: &dyn HistoryStore,
    ) -> Option<RecordId> {
        let request = self.begin_turn(text)?;
        let reply = assistant.ask(request).await;
        let id = self.finish_turn(reply);
        self.maybe_compact(summarizer, store).await;
        Some(id)
    }

    // ── Compaction ─────────────────────────────────────────────────

    /// Snapshot compaction inputs if the trigger fires.
    pub fn begin_compaction(&mut self) -> Option<CompactionJob> {
        self.compactor.begin(&self.log)
    }

    /// Apply a compaction result, then re-check the budget against the new
    /// summary cost.
    pub fn finish_compaction(
        &mut self,
        job: CompactionJob,
        result: Result<String, String>,
    ) -> Option<CompactionApplied> {
        let applied = self
            .compactor
            .finish(&mut self.log, &mut self.queue, job, result)?;
        self.enforce_budget();
        Some(applied)
    }

    /// Compact hidden history if the trigger fires, then ask the backend to
    /// drop the compacted records. A failed purge is logged and ignored.
    pub async fn maybe_compact(
        &mut self,
        summarizer: &dyn Summarizer,
        store: &dyn HistoryStore,
    ) -> Option<CompactionApplied> {
        let job = self.begin_compaction()?;
        let result = job.summarize(summarizer).await;
        let applied = self.finish_compaction(job, result)?;

        let request = PurgeRequest {
            space: self.space.clone(),
            ids: applied.removed.clone(),
        };
        match store.purge_hidden(request).await {
            Ok(removed) => debug!("purge: backend removed {removed} record(s)"),
            Err(e) => warn!("purge failed for space {}: {e}", self.space),
        }
        Some(applied)
    }

    // ── Presentation ───────────────────────────────────────────────

    /// Visible records grouped into display lines.
    pub fn view(&self) -> Vec<ViewLine> {
        build_view(&self.log.visible_records(), self.config.recent_turns)
    }

    /// The summary text, or a placeholder before the first compaction.
    pub fn summary_text(&self) -> &str {
        self.log
            .latest_summary()
            .map(|s| s.text.as_str())
            .unwrap_or(SUMMARY_PLACEHOLDER)
    }

    // ── Sync ───────────────────────────────────────────────────────

    /// Offer every queued record to the delivery channels now.
    pub fn flush(&mut self) -> FlushOutcome {
        self.last_flush = Instant::now();
        self.queue
            .flush(&mut self.log, &self.space, &self.deliveries)
    }

    /// Periodic trigger: flush once `flush_interval` has passed since the
    /// last flush.
    pub fn on_tick(&mut self, now: Instant) -> Option<FlushOutcome> {
        if now.saturating_duration_since(self.last_flush) < self.config.flush_interval {
            return None;
        }
        let outcome = self.flush();
        self.last_flush = now;
        Some(outcome)
    }

    /// The client is going away: flush whatever is queued. In-flight calls
    /// are not awaited.
    pub fn on_teardown(&mut self, reason: TeardownReason) -> FlushOutcome {
        debug!("teardown ({reason}) with {} queued record(s)", self.queue.len());
        self.flush()
    }

    fn enforce_budget(&mut self) {
        enforce(&mut self.log, &mut self.queue, &self.budget);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiFuture;
    use crate::context::compactor::tests::ScriptedSummarizer;
    use crate::sync::tests::RecordingChannel;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubAssistant {
        reply: Result<String, String>,
        requests: Mutex<Vec<AskRequest>>,
    }

    impl StubAssistant {
        fn replying(text: impl Into<String>) -> Self {
            Self {
                reply: Ok(text.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: &str) -> Self {
            Self {
                reply: Err(error.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Assistant for StubAssistant {
        fn ask(&self, request: AskRequest) -> ApiFuture<'_, String> {
            self.requests.lock().unwrap().push(request);
            let reply = self.reply.clone();
            Box::pin(async move { reply })
        }
    }

    struct StubStore {
        history: Result<Vec<WireMessage>, String>,
        purge_ok: bool,
        purges: Mutex<Vec<PurgeRequest>>,
    }

    impl StubStore {
        fn with_history(history: Vec<WireMessage>) -> Self {
            Self {
                history: Ok(history),
                purge_ok: true,
                purges: Mutex::new(Vec::new()),
            }
        }

        fn broken() -> Self {
            Self {
                history: Err("backend HTTP 502: bad gateway".into()),
                purge_ok: false,
                purges: Mutex::new(Vec::new()),
            }
        }
    }

    impl HistoryStore for StubStore {
        fn load_history(&self, _space: &str) -> ApiFuture<'_, Vec<WireMessage>> {
            let history = self.history.clone();
            Box::pin(async move { history })
        }

        fn purge_hidden(&self, request: PurgeRequest) -> ApiFuture<'_, usize> {
            let count = request.ids.len();
            self.purges.lock().unwrap().push(request);
            let ok = self.purge_ok;
            Box::pin(async move {
                if ok {
                    Ok(count)
                } else {
                    Err("request failed: connection refused".to_string())
                }
            })
        }
    }

    fn small_config() -> WindowConfig {
        WindowConfig::default()
            .with_max_tokens(100)
            .with_reserved_tokens(0)
            .with_trigger_tokens(50)
    }

    #[test]
    fn history_snapshot_excludes_new_prompt() {
        let mut session = ChatSession::new("s", WindowConfig::default());
        let first = session.begin_turn("one").unwrap();
        assert!(first.history.is_empty());
        session.finish_turn(Ok("reply".into()));

        let second = session.begin_turn("two").unwrap();
        assert_eq!(second.prompt, "two");
        let texts: Vec<&str> = second.history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "reply"]);
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut session = ChatSession::new("s", WindowConfig::default());
        assert!(session.begin_turn("   \n").is_none());
        assert!(session.log().is_empty());
    }

    #[test]
    fn request_carries_label_and_session() {
        let mut session = ChatSession::new("s", WindowConfig::default())
            .with_ai_label("monday")
            .with_session_id("abc");
        let request = session.begin_turn("hi").unwrap();
        assert_eq!(request.ai_label.as_deref(), Some("monday"));
        assert_eq!(request.session_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn assistant_failure_becomes_visible_error_record() {
        let mut session = ChatSession::new("s", WindowConfig::default());
        let assistant = StubAssistant::failing("backend HTTP 500: boom");
        let summarizer = ScriptedSummarizer::new(vec![]);
        let store = StubStore::with_history(vec![]);

        let id = session
            .submit("hello", &assistant, &summarizer, &store)
            .await
            .unwrap();

        let record = session.log().get(id).unwrap();
        assert_eq!(record.role, Role::Assistant);
        assert_eq!(record.text, "Error: backend HTTP 500: boom");
        assert!(record.is_visible());
        assert!(record.queued);
        assert_eq!(
            session.usage().visible_tokens,
            crate::context::estimate_tokens("hello")
                + crate::context::estimate_tokens(&record.text)
        );
    }

    #[tokio::test]
    async fn error_record_is_evicted_like_any_reply() {
        let mut session = ChatSession::new("s", small_config());
        let assistant = StubAssistant::failing(&"e".repeat(200));
        let summarizer = ScriptedSummarizer::new(vec![]);
        let store = StubStore::with_history(vec![]);

        let first = session
            .submit("hi", &assistant, &summarizer, &store)
            .await
            .unwrap();
        // The error text alone exceeds the budget and is hidden whole.
        assert!(session.log().get(first).unwrap().hidden);
        assert!(session.usage().fits());
    }

    #[tokio::test]
    async fn submit_compacts_and_purges() {
        let mut session = ChatSession::new("s", small_config());
        let assistant = StubAssistant::replying("y".repeat(60));
        let summarizer = ScriptedSummarizer::new(vec![Ok("sum".into())]);
        let store = StubStore::with_history(vec![]);

        for i in 0..3 {
            session
                .submit(&format!("{i}{}", "x".repeat(59)), &assistant, &summarizer, &store)
                .await;
        }

        assert_eq!(summarizer.calls(), 1);
        assert_eq!(session.summary_text(), "sum");
        assert_eq!(session.log().len(), 4);
        assert_eq!(session.log().hidden_cost(), 0);
        assert!(session.usage().fits());

        let purges = store.purges.lock().unwrap();
        assert_eq!(purges.len(), 1);
        assert_eq!(purges[0].space, "s");
        assert_eq!(purges[0].ids.len(), 3);
    }

    #[tokio::test]
    async fn purge_failure_is_ignored() {
        let mut session = ChatSession::new("s", small_config());
        let assistant = StubAssistant::replying("y".repeat(60));
        let summarizer = ScriptedSummarizer::new(vec![Ok("sum".into())]);
        let store = StubStore {
            purge_ok: false,
            ..StubStore::with_history(vec![])
        };

        for _ in 0..3 {
            session
                .submit(&"x".repeat(60), &assistant, &summarizer, &store)
                .await;
        }
        assert_eq!(session.compactor().compaction_count(), 1);
        assert_eq!(session.summary_text(), "sum");
    }

    #[tokio::test]
    async fn load_failure_starts_with_greeting() {
        let config = WindowConfig::default().with_greeting("Welcome back!");
        let mut session = ChatSession::new("s", config);
        let loaded = session.load(&StubStore::broken()).await;

        assert_eq!(loaded, 0);
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.log().all()[0].role, Role::Assistant);
        assert_eq!(session.queue().len(), 1);
        assert_eq!(session.summary_text(), SUMMARY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn stored_history_suppresses_greeting() {
        let mut seed = ChatSession::new("s", WindowConfig::default());
        seed.begin_turn("earlier");
        let stored = seed.log().to_wire();

        let config = WindowConfig::default().with_greeting("Welcome back!");
        let mut session = ChatSession::new("s", config);
        session.load(&StubStore::with_history(stored)).await;
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.log().all()[0].text, "earlier");
        assert!(session.queue().is_empty());
    }

    fn stored(id: u64, role: Role, text: String) -> WireMessage {
        WireMessage {
            id: Some(RecordId(id)),
            role,
            text,
            ts: 1_000 + id as i64,
            hidden: false,
            kind: None,
        }
    }

    #[tokio::test]
    async fn history_over_trigger_compacts_on_load() {
        // Six 30-token records against a budget of 100: three get hidden,
        // 90 hidden tokens against a trigger of 50.
        let history: Vec<WireMessage> = (0..6)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                stored(i, role, format!("{i}").repeat(60))
            })
            .collect();
        let store = StubStore::with_history(history);
        let summarizer = ScriptedSummarizer::new(vec![Ok("sum".into())]);
        let mut session = ChatSession::new("s", small_config());

        let loaded = session.load_and_compact(&store, &summarizer).await;

        assert_eq!(loaded, 6);
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(session.summary_text(), "sum");
        assert_eq!(session.log().len(), 4);
        assert_eq!(session.log().hidden_cost(), 0);
        assert!(session.usage().fits());

        let purges = store.purges.lock().unwrap();
        assert_eq!(purges.len(), 1);
        assert_eq!(purges[0].ids, [RecordId(0), RecordId(1), RecordId(2)]);

        let summary_id = session.log().latest_summary().unwrap().id;
        assert_eq!(session.queue().ids(), &[summary_id]);
    }

    #[tokio::test]
    async fn history_under_trigger_loads_without_compaction() {
        let history = vec![stored(0, Role::User, "q".into()), stored(1, Role::Assistant, "a".into())];
        let store = StubStore::with_history(history);
        let summarizer = ScriptedSummarizer::new(vec![]);
        let mut session = ChatSession::new("s", small_config());

        assert_eq!(session.load_and_compact(&store, &summarizer).await, 2);
        assert_eq!(summarizer.calls(), 0);
        assert!(store.purges.lock().unwrap().is_empty());
    }

    #[test]
    fn visible_summary_on_load_is_written_back_hidden() {
        let mut summary = stored(5, Role::System, "sum".into());
        summary.kind = Some(crate::RecordKind::Summary);
        let mut session = ChatSession::new("s", WindowConfig::default());
        session.restore(vec![stored(0, Role::User, "q".into()), summary]);

        assert_eq!(session.queue().ids(), &[RecordId(5)]);
        let (channel, batches) = RecordingChannel::new("beacon", true);
        let mut session = session.with_delivery(channel);
        session.flush();
        let batches = batches.lock().unwrap();
        assert_eq!(batches[0].messages.len(), 1);
        assert!(batches[0].messages[0].hidden);
        assert!(batches[0].messages[0].is_summary());
    }

    #[tokio::test]
    async fn reload_round_trip_preserves_view() {
        let (channel, batches) = RecordingChannel::new("beacon", true);
        let mut session = ChatSession::new("s", small_config()).with_delivery(channel);
        let assistant = StubAssistant::replying("y".repeat(80));
        let summarizer = ScriptedSummarizer::new(vec![]);
        let store = StubStore::with_history(vec![]);
        for i in 0..3 {
            session
                .submit(&format!("q{i}"), &assistant, &summarizer, &store)
                .await;
        }
        let before = session.view();
        assert!(session.log().all().iter().any(|r| r.hidden));

        session.on_teardown(TeardownReason::Unload);
        let stored: Vec<WireMessage> = batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.messages.clone())
            .collect();

        let mut reloaded = ChatSession::new("s", small_config());
        reloaded.load(&StubStore::with_history(stored)).await;
        assert_eq!(reloaded.view(), before);
        assert!(reloaded.queue().is_empty());
    }

    #[test]
    fn teardown_flushes_through_first_accepting_channel() {
        let (beacon, beacon_batches) = RecordingChannel::new("beacon", false);
        let (keepalive, keepalive_batches) = RecordingChannel::new("keepalive", true);
        let mut session = ChatSession::new("s", WindowConfig::default())
            .with_delivery(beacon)
            .with_delivery(keepalive);
        session.begin_turn("bye");

        let outcome = session.on_teardown(TeardownReason::PageHide);
        assert!(matches!(outcome, FlushOutcome::Dispatched { ref channel, count: 1 } if channel == "keepalive"));
        assert!(beacon_batches.lock().unwrap().is_empty());
        assert_eq!(keepalive_batches.lock().unwrap().len(), 1);
        assert!(session.log().all()[0].persisted);

        // A second teardown has nothing left to send.
        assert_eq!(
            session.on_teardown(TeardownReason::Unload),
            FlushOutcome::Empty
        );
    }

    #[test]
    fn tick_respects_flush_interval() {
        let (channel, batches) = RecordingChannel::new("beacon", true);
        let config = WindowConfig::default().with_flush_interval(Duration::from_secs(30));
        let mut session = ChatSession::new("s", config).with_delivery(channel);
        session.begin_turn("hello");

        let start = Instant::now();
        assert!(session.on_tick(start).is_none());
        let outcome = session.on_tick(start + Duration::from_secs(31));
        assert!(matches!(outcome, Some(FlushOutcome::Dispatched { count: 1, .. })));
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert!(session.on_tick(start + Duration::from_secs(40)).is_none());
    }
}
