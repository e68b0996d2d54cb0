//! HTTP implementations of the collaborator traits against the `chatbuf-web`
//! backend.
//!
//! Every response is checked twice before parsing: a non-2xx status becomes
//! `backend HTTP <status>: <body>`, and a body whose `Content-Type` is not
//! JSON (an HTML error page from a proxy, say) becomes
//! `expected JSON response, got <type>`. Neither ever panics.

use super::retry::{RetryConfig, retry_call};
use super::{
    ApiFuture, ApiReply, AskRequest, Assistant, Delivery, HistoryResponse, HistoryStore,
    PersistBatch, PurgeRequest, PurgeResponse, SessionStartRequest, SessionStartResponse,
    Summarizer, SummaryRequest,
};
use crate::WireMessage;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MESSAGES_PATH: &str = "/api/messages";
const SAVE_PATH: &str = "/api/save_messages";
const PURGE_PATH: &str = "/api/purge_hidden";
const ASK_PATH: &str = "/api/ai";
const SUMMARIZE_PATH: &str = "/api/summarize";
const SESSION_START_PATH: &str = "/session/start";

fn build_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .user_agent(concat!("chatbuf/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
}

/// Turn a response into `T`, refusing error statuses and non-JSON bodies.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, String> {
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let text = resp
        .text()
        .await
        .map_err(|e| format!("failed to read response: {e}"))?;

    if !status.is_success() {
        return Err(format!("backend HTTP {status}: {text}"));
    }
    if !is_json(&content_type) {
        let shown = if content_type.is_empty() {
            "no content type"
        } else {
            content_type.as_str()
        };
        return Err(format!("expected JSON response, got {shown}"));
    }
    serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))
}

/// POST a persist batch; the backend answers with an empty 2xx.
async fn post_batch(client: &reqwest::Client, url: &str, batch: &PersistBatch) -> Result<(), String> {
    let resp = client
        .post(url)
        .json(batch)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let text = resp.text().await.unwrap_or_default();
    Err(format!("backend HTTP {status}: {text}"))
}

// ── Backend client ─────────────────────────────────────────────────

/// Client for the `chatbuf-web` backend.
///
/// Implements [`Assistant`], [`Summarizer`], and [`HistoryStore`]. Delivery
/// channels are separate types built from it ([`BeaconChannel`],
/// [`KeepaliveChannel`]).
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Retry policy for assistant calls.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Open a backend session seeded with the server's facts plus `facts`.
    pub async fn start_session(&self, facts: Vec<String>) -> Result<SessionStartResponse, String> {
        let started: SessionStartResponse = self
            .post_json(SESSION_START_PATH, &SessionStartRequest { facts })
            .await?;
        debug!(
            "session {} started with {} fact(s)",
            started.session_id, started.facts_count
        );
        Ok(started)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, String>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let start = Instant::now();
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        debug!(
            "POST {path}: HTTP {} in {:.1}s",
            resp.status(),
            start.elapsed().as_secs_f64()
        );
        decode(resp).await
    }
}

impl Assistant for HttpBackend {
    fn ask(&self, request: AskRequest) -> ApiFuture<'_, String> {
        Box::pin(async move {
            debug!(
                "asking assistant: {} chars, {} history item(s)",
                request.prompt.chars().count(),
                request.history.len()
            );
            let reply: ApiReply =
                retry_call(&self.retry, || self.post_json(ASK_PATH, &request)).await?;
            reply.into_result()
        })
    }
}

impl Summarizer for HttpBackend {
    fn summarize(&self, request: SummaryRequest) -> ApiFuture<'_, String> {
        Box::pin(async move {
            let reply: ApiReply = self.post_json(SUMMARIZE_PATH, &request).await?;
            reply.into_result()
        })
    }
}

impl HistoryStore for HttpBackend {
    fn load_history(&self, space: &str) -> ApiFuture<'_, Vec<WireMessage>> {
        let space = space.to_string();
        Box::pin(async move {
            let url = reqwest::Url::parse_with_params(&self.url(MESSAGES_PATH), [("space", &space)])
                .map_err(|e| format!("invalid backend URL: {e}"))?;
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            let history: HistoryResponse = decode(resp).await?;
            if !history.exists {
                debug!("space {space} has no stored history");
            }
            Ok(history.messages)
        })
    }

    fn purge_hidden(&self, request: PurgeRequest) -> ApiFuture<'_, usize> {
        Box::pin(async move {
            let resp: PurgeResponse = self.post_json(PURGE_PATH, &request).await?;
            Ok(resp.removed)
        })
    }
}

// ── Delivery channels ──────────────────────────────────────────────

/// Deliveries spawned by a [`BeaconChannel`] that may still be running.
///
/// A process about to exit can [`settle`](Self::settle) them so the runtime
/// shutdown does not cut the last batch off.
#[derive(Clone, Default)]
pub struct InFlightDeliveries {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl InFlightDeliveries {
    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait up to `timeout` for tracked deliveries. Returns how many were
    /// still tracked when called.
    pub async fn settle(&self, timeout: Duration) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let count = handles.len();
        let all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!("beacon: {count} delivery(ies) still running after {timeout:?}");
        }
        count
    }
}

/// Preferred channel: spawns the POST onto the current tokio runtime and
/// returns at once.
///
/// Refuses the batch when called outside a runtime. A batch still in flight
/// when the runtime shuts down is lost unless its
/// [`InFlightDeliveries`] are settled first.
pub struct BeaconChannel {
    client: reqwest::Client,
    url: String,
    in_flight: InFlightDeliveries,
}

impl BeaconChannel {
    pub fn new(backend: &HttpBackend) -> Self {
        Self {
            client: backend.client.clone(),
            url: backend.url(SAVE_PATH),
            in_flight: InFlightDeliveries::default(),
        }
    }

    /// Shared handle on this channel's running deliveries.
    pub fn in_flight(&self) -> InFlightDeliveries {
        self.in_flight.clone()
    }
}

impl Delivery for BeaconChannel {
    fn name(&self) -> &str {
        "beacon"
    }

    fn dispatch(&self, batch: &PersistBatch) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let batch = batch.clone();
        let task = handle.spawn(async move {
            if let Err(e) = post_batch(&client, &url, &batch).await {
                warn!("beacon delivery failed for space {}: {e}", batch.space);
            }
        });
        self.in_flight.track(task);
        true
    }
}

/// Fallback channel: hands batches to a dedicated delivery thread with its
/// own runtime, so deliveries continue after the session (and the caller's
/// runtime) is gone.
///
/// Refuses the batch only once the worker has stopped.
pub struct KeepaliveChannel {
    tx: mpsc::UnboundedSender<PersistBatch>,
}

/// Handle to the keepalive delivery thread.
///
/// The thread drains every accepted batch, then exits when the last
/// [`KeepaliveChannel`] is dropped.
pub struct KeepaliveWorker {
    thread: std::thread::JoinHandle<()>,
}

impl KeepaliveChannel {
    /// Start the delivery thread.
    pub fn spawn(backend: &HttpBackend) -> Result<(Self, KeepaliveWorker), String> {
        let client = build_client()?;
        let url = backend.url(SAVE_PATH);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to build keepalive runtime: {e}"))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistBatch>();

        let thread = std::thread::Builder::new()
            .name("chatbuf-keepalive".into())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(batch) = rx.recv().await {
                        match post_batch(&client, &url, &batch).await {
                            Ok(()) => debug!(
                                "keepalive delivered {} record(s) for space {}",
                                batch.messages.len(),
                                batch.space
                            ),
                            Err(e) => {
                                warn!("keepalive delivery failed for space {}: {e}", batch.space)
                            }
                        }
                    }
                });
            })
            .map_err(|e| format!("failed to spawn keepalive worker: {e}"))?;

        Ok((Self { tx }, KeepaliveWorker { thread }))
    }
}

impl Delivery for KeepaliveChannel {
    fn name(&self) -> &str {
        "keepalive"
    }

    fn dispatch(&self, batch: &PersistBatch) -> bool {
        self.tx.send(batch.clone()).is_ok()
    }
}

impl KeepaliveWorker {
    /// Wait for every accepted batch to be attempted. Returns once all
    /// channels have been dropped and the queue is drained.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("keepalive worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> PersistBatch {
        PersistBatch {
            space: "s".into(),
            messages: Vec::new(),
        }
    }

    #[test]
    fn json_content_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/problem+json"));
        assert!(!is_json("text/html; charset=utf-8"));
        assert!(!is_json(""));
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let backend = HttpBackend::new("http://localhost:3001/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:3001");
        assert_eq!(backend.url(SAVE_PATH), "http://localhost:3001/api/save_messages");
    }

    #[test]
    fn beacon_refuses_outside_runtime() {
        let backend = HttpBackend::new("http://127.0.0.1:9").unwrap();
        let beacon = BeaconChannel::new(&backend);
        assert!(!beacon.dispatch(&batch()));
    }

    #[tokio::test]
    async fn beacon_accepts_inside_runtime_and_settles() {
        let backend = HttpBackend::new("http://127.0.0.1:9").unwrap();
        let beacon = BeaconChannel::new(&backend);
        let in_flight = beacon.in_flight();
        assert!(beacon.dispatch(&batch()));
        assert_eq!(in_flight.settle(Duration::from_secs(5)).await, 1);
        assert_eq!(in_flight.settle(Duration::from_secs(5)).await, 0);
    }

    #[test]
    fn keepalive_accepts_until_worker_stops() {
        let backend = HttpBackend::new("http://127.0.0.1:9").unwrap();
        let (channel, worker) = KeepaliveChannel::spawn(&backend).unwrap();
        assert!(channel.dispatch(&batch()));
        drop(channel);
        // Delivery to the closed port fails, is logged, and the worker exits.
        worker.join();
    }
}
