//! System prompts and message assembly for the assistant and summarizer.

use chatbuf::api::{AskRequest, SummaryRequest};
use chatbuf::{Role, WireMessage};
use chrono::{DateTime, FixedOffset, Utc};

use crate::llm::ChatMessage;

/// Korea Standard Time, UTC+9.
const KST_OFFSET_SECS: i32 = 9 * 3600;

const TEST_PROMPT: &str = "\
Only answer what the user explicitly asks; do not add anything extra.
If the user requests code modifications, always provide the entire updated code \
in a fully working state, not just partial changes.
Do not explain alternatives or unrelated technologies unless the user specifically asks.
Keep answers direct, minimal, and focused only on the question.";

const SUMMARY_LABEL_PROMPT: &str =
    "You are a helpful assistant. Please summarize the conversation.";

const DEFAULT_PROMPT: &str = "You are a helpful assistant.";

/// Instructions for the rolling-summary call.
const SUMMARY_RULES: &str = "\
Update the existing summary with the new information from the conversation.
Keep previous requirements, decisions, and code unless they were replaced.

Output only two sections:
1. Final requirements: an updated bullet-point summary of what the user wants and what was decided.
2. Final code: the complete final working code merged with updates, or \"none\" if there is no code.

Do not include intermediate reasoning, partial code, or rejected attempts.
Do not restate the conversation history.";

/// Current date and time in KST, `YYYY-MM-DD HH:MM:SS`.
pub fn current_kst(now: DateTime<Utc>) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    match FixedOffset::east_opt(KST_OFFSET_SECS) {
        Some(kst) => now.with_timezone(&kst).format(FORMAT).to_string(),
        None => now.format(FORMAT).to_string(),
    }
}

/// System prompt selected by `ai_label`; unknown labels get the default.
pub fn system_prompt(ai_label: Option<&str>, now: DateTime<Utc>) -> String {
    match ai_label {
        Some("test") => TEST_PROMPT.to_string(),
        Some("monday") => format!(
            "You are a helpful assistant. Today's date in KST is {}.",
            current_kst(now)
        ),
        Some("summary") => SUMMARY_LABEL_PROMPT.to_string(),
        _ => DEFAULT_PROMPT.to_string(),
    }
}

/// Append session facts to a system prompt.
pub fn with_facts(prompt: String, facts: &[String]) -> String {
    if facts.is_empty() {
        return prompt;
    }
    let mut out = prompt;
    out.push_str("\n\nKnown facts about the user (key=value):\n");
    for fact in facts {
        out.push_str("- ");
        out.push_str(fact);
        out.push('\n');
    }
    out
}

/// Messages for an assistant call.
///
/// The summary (if any) goes in as a system note, then the visible history,
/// then the prompt. Hidden records stay out: they are already covered by the
/// summary or waiting to be.
pub fn ask_messages(system: String, request: &AskRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];

    if let Some(summary) = request
        .history
        .iter()
        .rev()
        .find(|m| m.is_summary() && !m.text.trim().is_empty())
    {
        messages.push(ChatMessage::system(format!(
            "Summary of the earlier conversation:\n{}",
            summary.text
        )));
    }

    messages.extend(
        request
            .history
            .iter()
            .filter(|m| !m.hidden && !m.is_summary())
            .map(history_message),
    );
    messages.push(ChatMessage::user(request.prompt.clone()));
    messages
}

fn history_message(m: &WireMessage) -> ChatMessage {
    match m.role {
        Role::User => ChatMessage::user(m.text.clone()),
        Role::Assistant => ChatMessage::assistant(m.text.clone()),
        Role::System => ChatMessage::system(m.text.clone()),
    }
}

/// Messages for a summarization call.
///
/// With items, the previous summary and the new items are merged. Without
/// items, the previous summary alone is compressed.
pub fn summary_messages(request: &SummaryRequest) -> Vec<ChatMessage> {
    let system = format!(
        "{SUMMARY_RULES}\n\nWrite the summary in {}. Keep it under {} characters.",
        request.language, request.max_chars
    );

    let mut content = String::new();
    if request.items.is_empty() {
        content.push_str("=== SUMMARY TO COMPRESS ===\n");
        content.push_str(&request.previous_summary);
        content.push_str(&format!(
            "\n\nShorten this summary to at most {} characters without losing requirements or final code.",
            request.max_chars
        ));
    } else {
        if !request.previous_summary.trim().is_empty() {
            content.push_str("=== EXISTING SUMMARY ===\n");
            content.push_str(&request.previous_summary);
            content.push_str("\n\n");
        }
        content.push_str("=== NEW MESSAGES TO SUMMARIZE ===\n");
        for item in &request.items {
            content.push_str(&format!("[{}] {}\n", item.role, item.text));
        }
    }

    vec![ChatMessage::system(system), ChatMessage::user(content)]
}
