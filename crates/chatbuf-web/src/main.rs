//! chatbuf backend server.
//!
//! Stores per-space chat history and answers assistant and summarization
//! calls through OpenRouter.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... chatbuf-web
//! OPENROUTER_KEY=sk-... chatbuf-web --port 8080 --data-dir ./data
//! OPENROUTER_KEY=sk-... chatbuf-web --fact "name=Alex" --static-dir ./static
//! ```
//!
//! Then point a `chatbuf` client (or a browser page served from
//! `--static-dir`) at the printed URL.

use std::path::PathBuf;

use chatbuf_web::llm::{DEFAULT_MODEL, OpenRouterClient};
use chatbuf_web::{WebConfig, spawn_web};
use clap::Parser;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// chatbuf backend server.
#[derive(Parser)]
#[command(about = "Persistence, assistant, and summarization backend for chatbuf")]
struct Args {
    /// LLM model to use.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Mirror each space to <dir>/<space>.json.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// `key=value` fact seeded into every session (repeatable).
    #[arg(long = "fact")]
    facts: Vec<String>,

    /// Serve static files from this directory.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Completion budget for assistant replies.
    #[arg(long, default_value_t = 2048)]
    reply_max_tokens: u32,

    /// Log request detail.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(level),
        )
        .init();

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let client = OpenRouterClient::new(api_key, &args.model)?;
    info!("using model {}", client.model());

    let config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
        static_dir: args.static_dir,
        data_dir: args.data_dir,
        facts: args.facts,
        reply_max_tokens: args.reply_max_tokens,
    };
    let addr = spawn_web(std::sync::Arc::new(client), config).await?;
    println!("chatbuf backend: http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for ctrl-c: {e}"))?;
    info!("shutting down");
    Ok(())
}
