//! Reference backend for [`chatbuf`] chat sessions.
//!
//! `chatbuf-web` is an axum server holding per-space message history and
//! fronting an LLM for assistant replies and rolling summaries. It speaks the
//! wire format of [`chatbuf::api::HttpBackend`], so a `ChatSession` pointed at
//! it gets persistence, summarization, and purging with no extra glue.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatbuf_web::{WebConfig, spawn_web};
//! use chatbuf_web::llm::{OpenRouterClient, DEFAULT_MODEL};
//!
//! let llm = Arc::new(OpenRouterClient::new(api_key, DEFAULT_MODEL)?);
//! let addr = spawn_web(llm, WebConfig::default()).await?;
//! println!("Backend: http://{addr}");
//! ```
//!
//! # Endpoints
//!
//! ```text
//! GET  /api/messages?space=…   stored history        → {exists, messages}
//! POST /api/save_messages      upsert records by id  → 204
//! POST /api/purge_hidden       drop compacted records → {removed}
//! POST /api/ai                 assistant reply        → {ok, output | error}
//! POST /api/summarize          rolling summary        → {ok, output | error}
//! POST /session/start          facts-seeded session   → {session_id, facts_count}
//! ```

mod api;
pub mod llm;
pub mod prompts;
mod server;
pub mod sessions;
pub mod store;

pub use api::AppState;
pub use llm::{ChatMessage, LlmBackend, OpenRouterClient};
pub use sessions::SessionRegistry;
pub use store::MessageStore;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Directory of static files served for unknown paths.
    ///
    /// If `None`, only the API endpoints are served.
    pub static_dir: Option<PathBuf>,
    /// Directory mirroring each space as `<space>.json`. `None` keeps
    /// history in memory only.
    pub data_dir: Option<PathBuf>,
    /// `key=value` facts seeded into every session.
    pub facts: Vec<String>,
    /// Completion budget for assistant replies. Default: 2048.
    pub reply_max_tokens: u32,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            static_dir: None,
            data_dir: None,
            facts: Vec::new(),
            reply_max_tokens: 2048,
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// Fails if the data directory cannot be opened or the address cannot be
/// bound. The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(llm: Arc<dyn LlmBackend>, config: WebConfig) -> Result<SocketAddr, String> {
    let store = match &config.data_dir {
        Some(dir) => MessageStore::with_data_dir(dir)?,
        None => MessageStore::in_memory(),
    };
    let state = AppState {
        store: Arc::new(store),
        sessions: Arc::new(SessionRegistry::new(config.facts)),
        llm,
        reply_max_tokens: config.reply_max_tokens,
    };
    let router = server::build_router(state, config.static_dir);
    server::start_server(router, config.bind_addr).await
}
