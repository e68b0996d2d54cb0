//! Collaborator seams: the assistant, the summarization service, the history
//! store, and sync delivery channels.
//!
//! The core never talks to the network directly. It calls these traits, and
//! every async method takes owned inputs so a driver can release the session
//! while a call is suspended:
//!
//! - [`Assistant`] — prompt + serialized history → reply text.
//! - [`Summarizer`] — plain items + previous summary → new summary text.
//! - [`HistoryStore`] — load a space's durable history; purge hidden records.
//! - [`Delivery`] — non-blocking, at-most-once hand-off of a persist batch.
//!
//! [`http`] implements all four against the `chatbuf-web` backend. [`retry`]
//! provides backoff for the assistant round-trip.

pub mod http;
pub mod retry;

// Re-export commonly used items at the module level.
pub use http::{BeaconChannel, HttpBackend, InFlightDeliveries, KeepaliveChannel, KeepaliveWorker};
pub use retry::RetryConfig;

use crate::{RecordId, Role, WireMessage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborator calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

// ── Request / response types ───────────────────────────────────────

/// Question for the assistant: the new prompt plus every record in the log,
/// visible and hidden, as it stood before the prompt was appended.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AskRequest {
    pub prompt: String,
    pub history: Vec<WireMessage>,
    /// Selects the backend's system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_label: Option<String>,
    /// Backend session whose facts should be added to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One plain conversation item handed to the summarization service.
///
/// Only `user` and `assistant` roles ever appear here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SummaryItem {
    pub role: Role,
    pub text: String,
    pub ts: i64,
}

/// Input for one summarization call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SummaryRequest {
    pub items: Vec<SummaryItem>,
    /// Summary being rolled forward; empty when there is none.
    #[serde(default)]
    pub previous_summary: String,
    pub language: String,
    /// Upper bound on the returned summary length, in characters.
    pub max_chars: usize,
}

/// Batch of records for the persistence backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PersistBatch {
    pub space: String,
    pub messages: Vec<WireMessage>,
}

/// Purge request: the backend drops the listed ids and every stored record
/// that is hidden and not the summary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PurgeRequest {
    pub space: String,
    #[serde(default)]
    pub ids: Vec<RecordId>,
}

/// Response body of `GET /api/messages`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HistoryResponse {
    pub exists: bool,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

/// Response body of `POST /api/purge_hidden`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PurgeResponse {
    pub removed: usize,
}

/// Body of `POST /session/start`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SessionStartRequest {
    /// Extra facts appended to the backend's configured ones.
    #[serde(default)]
    pub facts: Vec<String>,
}

/// Response body of `POST /session/start`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionStartResponse {
    pub session_id: String,
    pub facts_count: usize,
}

/// Envelope returned by the assistant and summarization endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApiReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiReply {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Collapse the envelope into a `Result`.
    pub fn into_result(self) -> Result<String, String> {
        match (self.ok, self.output) {
            (true, Some(output)) => Ok(output),
            (true, None) => Err("empty response".to_string()),
            (false, _) => Err(self.error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

// ── Collaborator traits ────────────────────────────────────────────

/// The remote assistant.
pub trait Assistant: Send + Sync {
    fn ask(&self, request: AskRequest) -> ApiFuture<'_, String>;
}

/// The summarization service.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, request: SummaryRequest) -> ApiFuture<'_, String>;
}

/// Durable history for a conversation space.
pub trait HistoryStore: Send + Sync {
    /// Stored records in the backend's order.
    fn load_history(&self, space: &str) -> ApiFuture<'_, Vec<WireMessage>>;

    /// Delete hidden, non-summary records (and the listed ids). Returns the
    /// number of records removed.
    fn purge_hidden(&self, request: PurgeRequest) -> ApiFuture<'_, usize>;
}

/// A fire-and-forget transport for persist batches.
///
/// `dispatch` must not block: it only reports whether the transport accepted
/// the batch for delivery. There is no acknowledgment beyond that.
pub trait Delivery: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn dispatch(&self, batch: &PersistBatch) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_reply_into_result() {
        assert_eq!(ApiReply::success("hi").into_result(), Ok("hi".into()));
        assert_eq!(
            ApiReply::failure("boom").into_result(),
            Err("boom".into())
        );
        let empty = ApiReply {
            ok: true,
            output: None,
            error: None,
        };
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn api_reply_matches_backend_shape() {
        let reply: ApiReply = serde_json::from_str(r#"{"ok":false,"error":"quota"}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("quota"));
    }

    #[test]
    fn purge_request_defaults_ids() {
        let req: PurgeRequest = serde_json::from_str(r#"{"space":"s"}"#).unwrap();
        assert!(req.ids.is_empty());
    }
}
