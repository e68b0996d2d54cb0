//! Turn grouping for presentation.
//!
//! A turn is a user record and the assistant record directly after it. An
//! assistant record with no unpaired user before it (a greeting, an error
//! reply after a reload) is its own turn, as is a user record still waiting
//! for its reply. The newest turns come first, then a separator, then the
//! older ones, so nothing visible is ever dropped from display.

use crate::{MessageRecord, RecordId, Role};
use chrono::{Local, TimeZone};

/// One line of the rendered conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewLine {
    Message {
        id: RecordId,
        role: Role,
        text: String,
        /// Unix epoch milliseconds.
        timestamp: i64,
    },
    /// Boundary between the foregrounded recent turns and older history.
    Separator,
}

impl ViewLine {
    fn from_record(record: &MessageRecord) -> Self {
        ViewLine::Message {
            id: record.id,
            role: record.role,
            text: record.text.clone(),
            timestamp: record.timestamp,
        }
    }

    /// Single-line text rendering, e.g. `[14:05] user: hello`.
    pub fn render(&self) -> String {
        match self {
            ViewLine::Message {
                role,
                text,
                timestamp,
                ..
            } => format!("[{}] {role}: {text}", clock_time(*timestamp)),
            ViewLine::Separator => "──── earlier ────".to_string(),
        }
    }
}

/// Local `HH:MM` for an epoch-millisecond timestamp.
fn clock_time(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(t) => t.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

/// Group visible records into turns and order them for display.
///
/// Non-visible records (hidden or the summary) are skipped. The result holds
/// the newest `recent_turns` turns in chronological order, then a
/// [`ViewLine::Separator`] if older turns exist, then every older turn in
/// chronological order.
pub fn build_view(records: &[&MessageRecord], recent_turns: usize) -> Vec<ViewLine> {
    let turns = group_turns(records);
    let split = turns.len().saturating_sub(recent_turns);
    let (older, recent) = turns.split_at(split);

    let mut lines: Vec<ViewLine> = recent
        .iter()
        .flatten()
        .map(|r| ViewLine::from_record(r))
        .collect();
    if !older.is_empty() {
        lines.push(ViewLine::Separator);
        lines.extend(older.iter().flatten().map(|r| ViewLine::from_record(r)));
    }
    lines
}

fn group_turns<'a>(records: &[&'a MessageRecord]) -> Vec<Vec<&'a MessageRecord>> {
    let mut turns = Vec::new();
    let mut pending_user: Option<&MessageRecord> = None;

    for &record in records.iter().filter(|r| r.is_visible()) {
        match record.role {
            Role::User => {
                if let Some(user) = pending_user.replace(record) {
                    turns.push(vec![user]);
                }
            }
            Role::Assistant | Role::System => match pending_user.take() {
                Some(user) => turns.push(vec![user, record]),
                None => turns.push(vec![record]),
            },
        }
    }
    if let Some(user) = pending_user {
        turns.push(vec![user]);
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MessageLog;

    fn texts(lines: &[ViewLine]) -> Vec<String> {
        lines
            .iter()
            .map(|l| match l {
                ViewLine::Message { text, .. } => text.clone(),
                ViewLine::Separator => "|".to_string(),
            })
            .collect()
    }

    fn conversation(turns: usize) -> MessageLog {
        let mut log = MessageLog::new();
        for i in 1..=turns {
            log.append(Role::User, format!("u{i}"));
            log.append(Role::Assistant, format!("a{i}"));
        }
        log
    }

    #[test]
    fn recent_turns_first_then_older() {
        let log = conversation(5);
        let view = build_view(&log.visible_records(), 3);
        assert_eq!(
            texts(&view),
            ["u3", "a3", "u4", "a4", "u5", "a5", "|", "u1", "a1", "u2", "a2"]
        );
    }

    #[test]
    fn no_separator_without_older_turns() {
        let log = conversation(2);
        let view = build_view(&log.visible_records(), 3);
        assert_eq!(texts(&view), ["u1", "a1", "u2", "a2"]);
    }

    #[test]
    fn orphan_assistant_is_its_own_turn() {
        let mut log = MessageLog::new();
        log.append(Role::Assistant, "hello there");
        log.append(Role::User, "u1");
        log.append(Role::Assistant, "a1");
        let view = build_view(&log.visible_records(), 1);
        assert_eq!(texts(&view), ["u1", "a1", "|", "hello there"]);
    }

    #[test]
    fn consecutive_users_split_into_turns() {
        let mut log = MessageLog::new();
        log.append(Role::User, "first");
        log.append(Role::User, "second");
        log.append(Role::Assistant, "reply");
        let view = build_view(&log.visible_records(), 1);
        assert_eq!(texts(&view), ["second", "reply", "|", "first"]);
    }

    #[test]
    fn trailing_user_awaiting_reply_is_shown() {
        let mut log = conversation(1);
        log.append(Role::User, "pending");
        let view = build_view(&log.visible_records(), 3);
        assert_eq!(texts(&view), ["u1", "a1", "pending"]);
    }

    #[test]
    fn hidden_and_summary_records_never_shown() {
        let mut log = conversation(3);
        let first = log.all()[0].id;
        log.hide(first);
        log.upsert_summary("secret summary", 0);
        let all: Vec<&MessageRecord> = log.all().iter().collect();
        let view = build_view(&all, 10);
        let shown = texts(&view);
        assert!(!shown.contains(&"u1".to_string()));
        assert!(!shown.contains(&"secret summary".to_string()));
        // The orphaned reply stays on screen.
        assert!(shown.contains(&"a1".to_string()));
    }

    #[test]
    fn render_formats_role_and_time() {
        let line = ViewLine::Message {
            id: RecordId(0),
            role: Role::User,
            text: "hi".into(),
            timestamp: 0,
        };
        let rendered = line.render();
        assert!(rendered.ends_with("] user: hi"));
        assert_eq!(rendered.find(':'), Some(3));
        assert!(ViewLine::Separator.render().contains("earlier"));
    }
}
