//! REST API endpoint handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chatbuf::api::{
    ApiReply, AskRequest, HistoryResponse, PersistBatch, PurgeRequest, PurgeResponse,
    SessionStartRequest, SessionStartResponse, SummaryRequest,
};
use chatbuf::context::CHARS_PER_TOKEN;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::llm::LlmBackend;
use crate::prompts;
use crate::sessions::SessionRegistry;
use crate::store::MessageStore;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub sessions: Arc<SessionRegistry>,
    pub llm: Arc<dyn LlmBackend>,
    /// Completion budget for assistant replies.
    pub reply_max_tokens: u32,
}

/// Query for GET /api/messages. `page` is accepted as an older name.
#[derive(Deserialize)]
pub struct SpaceQuery {
    #[serde(alias = "page")]
    pub space: Option<String>,
}

/// GET /api/messages — Stored history of a space.
pub async fn get_messages(
    State(app): State<AppState>,
    Query(query): Query<SpaceQuery>,
) -> Json<HistoryResponse> {
    let space = query.space.unwrap_or_else(|| "unknown".to_string());
    let response = match app.store.load(&space) {
        Some(messages) => HistoryResponse {
            exists: true,
            messages,
        },
        None => HistoryResponse::default(),
    };
    debug!(
        "history for space {space}: {} record(s)",
        response.messages.len()
    );
    Json(response)
}

/// POST /api/save_messages — Upsert a batch of records.
///
/// Returns 204 on success, 500 if the store could not be written.
pub async fn post_save_messages(
    State(app): State<AppState>,
    Json(batch): Json<PersistBatch>,
) -> StatusCode {
    match app.store.save(&batch.space, batch.messages) {
        Ok(count) => {
            debug!("saved {count} record(s) for space {}", batch.space);
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            warn!("save failed for space {}: {e}", batch.space);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// POST /api/purge_hidden — Drop hidden, non-summary records and the listed
/// ids.
pub async fn post_purge_hidden(
    State(app): State<AppState>,
    Json(body): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>, (StatusCode, String)> {
    match app.store.purge_hidden(&body.space, &body.ids) {
        Ok(removed) => {
            info!("purged {removed} record(s) from space {}", body.space);
            Ok(Json(PurgeResponse { removed }))
        }
        Err(e) => {
            warn!("purge failed for space {}: {e}", body.space);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// POST /api/ai — Ask the assistant.
///
/// Returns `{ok:true, output}`; a blank prompt is a 400 and a failed
/// completion a 502, both as `{ok:false, error}`.
pub async fn post_ai(
    State(app): State<AppState>,
    Json(body): Json<AskRequest>,
) -> (StatusCode, Json<ApiReply>) {
    if body.prompt.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiReply::failure("empty prompt")));
    }

    let mut system = prompts::system_prompt(body.ai_label.as_deref(), Utc::now());
    if let Some(id) = body.session_id.as_deref() {
        match app.sessions.touch(id) {
            Some(facts) => system = prompts::with_facts(system, &facts),
            None => debug!("unknown session {id}; answering without facts"),
        }
    }
    let messages = prompts::ask_messages(system, &body);

    match app.llm.complete(messages, app.reply_max_tokens).await {
        Ok(output) => (StatusCode::OK, Json(ApiReply::success(output))),
        Err(e) => {
            warn!("assistant completion failed: {e}");
            (StatusCode::BAD_GATEWAY, Json(ApiReply::failure(e)))
        }
    }
}

/// POST /api/summarize — Produce a rolling summary.
pub async fn post_summarize(
    State(app): State<AppState>,
    Json(body): Json<SummaryRequest>,
) -> (StatusCode, Json<ApiReply>) {
    if body.items.is_empty() && body.previous_summary.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiReply::failure("nothing to summarize")));
    }

    // Room for the requested length plus some slack for formatting.
    let max_tokens = (body.max_chars.div_ceil(CHARS_PER_TOKEN) * 2).clamp(256, 8192) as u32;
    let messages = prompts::summary_messages(&body);
    debug!(
        "summarizing {} item(s), previous summary {} chars",
        body.items.len(),
        body.previous_summary.chars().count()
    );

    match app.llm.complete(messages, max_tokens).await {
        Ok(output) => (StatusCode::OK, Json(ApiReply::success(output))),
        Err(e) => {
            warn!("summary completion failed: {e}");
            (StatusCode::BAD_GATEWAY, Json(ApiReply::failure(e)))
        }
    }
}

/// POST /session/start — Start a session seeded with facts.
///
/// The body is optional; a missing or malformed body starts a session with
/// the configured facts only.
pub async fn post_session_start(
    State(app): State<AppState>,
    body: Bytes,
) -> Json<SessionStartResponse> {
    let request: SessionStartRequest = serde_json::from_slice(&body).unwrap_or_default();
    let (session_id, facts_count) = app.sessions.start(request.facts);
    info!("session {session_id} started with {facts_count} fact(s)");
    Json(SessionStartResponse {
        session_id,
        facts_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_query_accepts_page_alias() {
        let query: SpaceQuery = serde_json::from_str(r#"{"page":"monday"}"#).unwrap();
        assert_eq!(query.space.as_deref(), Some("monday"));
    }

    #[test]
    fn session_start_body_is_lenient() {
        let parsed: SessionStartRequest = serde_json::from_slice(b"").unwrap_or_default();
        assert!(parsed.facts.is_empty());
        let parsed: SessionStartRequest =
            serde_json::from_slice(br#"{"facts":["a=1"]}"#).unwrap_or_default();
        assert_eq!(parsed.facts, ["a=1"]);
    }
}
