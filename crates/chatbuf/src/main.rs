//! Terminal chat client for a `chatbuf-web` backend.
//!
//! Reads prompts from stdin, one per line, and prints the replies. History is
//! loaded from and synced back to the backend; the context sent to the
//! assistant is kept within budget and old turns are folded into a rolling
//! summary.
//!
//! # Examples
//!
//! ```sh
//! # Chat in the "monday" space with the monday system prompt
//! chatbuf --space /chat/monday --ai-label monday
//!
//! # Tighter budget, start a backend session with extra facts
//! chatbuf --max-tokens 4000 --fact "name=Alex" --fact "timezone=KST"
//! ```
//!
//! Commands: `/view` reprints the conversation, `/summary` prints the
//! rolling summary, `/usage` prints context usage, `/quit` exits.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chatbuf::prelude::*;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Terminal chat client for a chatbuf-web backend.
#[derive(Parser)]
#[command(name = "chatbuf")]
struct Cli {
    // ── Connection ─────────────────────────────────────────────
    /// Backend base URL
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    backend: String,

    /// Conversation space, or a page path whose last segment names it
    #[arg(long, default_value = "default")]
    space: String,

    /// System-prompt label passed to the backend
    #[arg(long)]
    ai_label: Option<String>,

    /// Extra session fact for the backend (repeatable)
    #[arg(long = "fact")]
    facts: Vec<String>,

    /// Retries for transient assistant failures
    #[arg(long, default_value_t = 2)]
    retries: u32,

    // ── Context window ─────────────────────────────────────────
    /// Total token budget for visible history plus summary
    #[arg(long, default_value_t = 8000)]
    max_tokens: usize,

    /// Tokens held back for the next reply
    #[arg(long, default_value_t = 1000)]
    reserved_tokens: usize,

    /// Hidden-history cost that starts summarization
    #[arg(long, default_value_t = 2000)]
    trigger_tokens: usize,

    /// Turns shown above the separator
    #[arg(long, default_value_t = 3)]
    recent_turns: usize,

    /// Seconds between periodic syncs
    #[arg(long, default_value_t = 30)]
    flush_interval: u64,

    /// Summary language
    #[arg(long, default_value = "English")]
    language: String,

    /// Assistant greeting for an empty space
    #[arg(long)]
    greeting: Option<String>,

    /// Log debug detail to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn window_config(&self) -> WindowConfig {
        let config = WindowConfig::default()
            .with_max_tokens(self.max_tokens)
            .with_reserved_tokens(self.reserved_tokens)
            .with_trigger_tokens(self.trigger_tokens)
            .with_recent_turns(self.recent_turns)
            .with_flush_interval(Duration::from_secs(self.flush_interval))
            .with_language(self.language.clone());
        match &self.greeting {
            Some(g) => config.with_greeting(g.clone()),
            None => config,
        }
    }
}

fn print_view(session: &ChatSession) {
    for line in session.view() {
        println!("{}", line.render());
    }
}

/// How a turn ended.
#[derive(Debug, PartialEq)]
enum Turn {
    /// The reply record, or `None` for blank input.
    Replied(Option<RecordId>),
    /// `shutdown` fired while the turn was still running.
    Interrupted,
}

/// Run one turn against `backend`, abandoning it if `shutdown` fires first.
///
/// The prompt is already logged and queued by then, so an interrupted turn
/// still reaches the teardown flush.
async fn run_turn<B, F>(
    session: &mut ChatSession,
    prompt: &str,
    backend: &B,
    shutdown: Pin<&mut F>,
) -> Turn
where
    B: Assistant + Summarizer + HistoryStore,
    F: Future,
{
    tokio::select! {
        id = session.submit(prompt, backend, backend, backend) => Turn::Replied(id),
        _ = shutdown => Turn::Interrupted,
    }
}

/// Read stdin on a plain thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(level),
        )
        .init();

    let backend = match HttpBackend::new(&cli.backend) {
        Ok(b) => b.with_retry(RetryConfig::with_retries(cli.retries)),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let beacon = BeaconChannel::new(&backend);
    let beacon_in_flight = beacon.in_flight();
    let (keepalive, keepalive_worker) = match KeepaliveChannel::spawn(&backend) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let space = if cli.space.contains('/') {
        space_from_path(&cli.space)
    } else {
        cli.space.clone()
    };
    let mut session = ChatSession::new(space, cli.window_config())
        .with_delivery(beacon)
        .with_delivery(keepalive);
    if let Some(label) = &cli.ai_label {
        session = session.with_ai_label(label.clone());
    }
    if !cli.facts.is_empty() || cli.ai_label.is_some() {
        match backend.start_session(cli.facts.clone()).await {
            Ok(started) => session = session.with_session_id(started.session_id),
            Err(e) => warn!("could not start backend session: {e}"),
        }
    }

    session.load_and_compact(&backend, &backend).await;
    println!("── space: {} ── summary: {}", session.space(), session.summary_text());
    print_view(&session);

    let mut lines = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // One signal future for the whole run, so ctrl-c also lands mid-turn.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/view" => print_view(&session),
                    "/summary" => println!("{}", session.summary_text()),
                    "/usage" => println!("{}", session.usage().to_log_string()),
                    prompt => {
                        let turn =
                            run_turn(&mut session, prompt, &backend, shutdown.as_mut()).await;
                        match turn {
                            Turn::Interrupted => break,
                            Turn::Replied(id) => {
                                if let Some(reply) = id.and_then(|id| session.log().get(id)) {
                                    println!("{}", reply.text);
                                }
                            }
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                session.on_tick(Instant::now());
            }
            _ = &mut shutdown => break,
        }
    }

    session.on_teardown(TeardownReason::Exit);
    drop(session);
    beacon_in_flight.settle(Duration::from_secs(5)).await;
    if tokio::task::spawn_blocking(move || keepalive_worker.join())
        .await
        .is_err()
    {
        warn!("keepalive worker did not shut down cleanly");
    }
}
