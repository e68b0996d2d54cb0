//! Per-space message storage.
//!
//! Records are kept in arrival order and upserted by id. With a data
//! directory configured, every space is mirrored to `<space>.json` using an
//! atomic temp-file + rename write, and reloaded on startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chatbuf::{RecordId, WireMessage};
use tracing::{debug, warn};

/// Message storage for every conversation space.
#[derive(Debug, Default)]
pub struct MessageStore {
    spaces: Mutex<HashMap<String, Vec<WireMessage>>>,
    data_dir: Option<PathBuf>,
}

/// Map a client-supplied space name onto a safe storage key.
pub fn space_key(space: &str) -> String {
    let key: String = space
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if key.is_empty() {
        "unknown".to_string()
    } else {
        key
    }
}

/// Give every id-less message a fresh id past the highest one in use.
fn assign_missing_ids(messages: &mut [WireMessage]) {
    let mut next = messages
        .iter()
        .filter_map(|m| m.id)
        .map(|id| id.0 + 1)
        .max()
        .unwrap_or(0);
    for message in messages.iter_mut().filter(|m| m.id.is_none()) {
        message.id = Some(RecordId(next));
        next += 1;
    }
}

impl MessageStore {
    /// Store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store mirrored to `dir`, loading any spaces already saved there.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Result<Self, String> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create data dir: {e}"))?;

        let mut spaces = HashMap::new();
        let entries =
            std::fs::read_dir(&dir).map_err(|e| format!("failed to read data dir: {e}"))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {e}"))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(space) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match load_file(&path) {
                Ok(mut messages) => {
                    assign_missing_ids(&mut messages);
                    spaces.insert(space.to_string(), messages);
                }
                Err(e) => warn!("skipping unreadable space file {}: {e}", path.display()),
            }
        }
        debug!("loaded {} space(s) from {}", spaces.len(), dir.display());

        Ok(Self {
            spaces: Mutex::new(spaces),
            data_dir: Some(dir),
        })
    }

    /// Stored messages for `space`, or `None` if nothing was ever saved.
    pub fn load(&self, space: &str) -> Option<Vec<WireMessage>> {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&space_key(space))
            .cloned()
    }

    /// Upsert `messages` into `space`: known ids are replaced in place, new
    /// ones appended in order. Returns the number of messages written.
    ///
    /// The space only changes in memory once the mirror file is written.
    pub fn save(&self, space: &str, messages: Vec<WireMessage>) -> Result<usize, String> {
        let key = space_key(space);
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stored = spaces.get(&key).cloned().unwrap_or_default();
        let count = messages.len();

        let mut next = stored
            .iter()
            .filter_map(|m| m.id)
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(0);
        for mut message in messages {
            match message.id {
                Some(id) => {
                    next = next.max(id.0 + 1);
                    match stored.iter_mut().find(|m| m.id == Some(id)) {
                        Some(existing) => *existing = message,
                        None => stored.push(message),
                    }
                }
                None => {
                    message.id = Some(RecordId(next));
                    next += 1;
                    stored.push(message);
                }
            }
        }

        self.persist(&key, &stored)?;
        spaces.insert(key, stored);
        Ok(count)
    }

    /// Delete the listed ids plus every hidden, non-summary record of
    /// `space`. Returns the number removed.
    pub fn purge_hidden(&self, space: &str, ids: &[RecordId]) -> Result<usize, String> {
        let key = space_key(space);
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = spaces.get(&key) else {
            return Ok(0);
        };
        let kept: Vec<WireMessage> = current
            .iter()
            .filter(|m| {
                let listed = m.id.is_some_and(|id| ids.contains(&id));
                let stale = m.hidden && !m.is_summary();
                !(listed || stale)
            })
            .cloned()
            .collect();
        let removed = current.len() - kept.len();
        if removed > 0 {
            self.persist(&key, &kept)?;
            spaces.insert(key, kept);
        }
        Ok(removed)
    }

    fn persist(&self, key: &str, messages: &[WireMessage]) -> Result<(), String> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let final_path = dir.join(format!("{key}.json"));
        let tmp_path = dir.join(format!(".{key}.json.tmp"));

        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| format!("failed to serialize space {key}: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("failed to write temp file for space {key}: {e}"))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| format!("failed to rename file for space {key}: {e}"))?;
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<Vec<WireMessage>, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("failed to read: {e}"))?;
    serde_json::from_str(&json).map_err(|e| format!("failed to parse: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbuf::{RecordKind, Role};

    fn msg(id: Option<u64>, text: &str, hidden: bool) -> WireMessage {
        WireMessage {
            id: id.map(RecordId),
            role: Role::User,
            text: text.into(),
            ts: 0,
            hidden,
            kind: None,
        }
    }

    fn texts(messages: &[WireMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn unknown_space_does_not_exist() {
        assert!(MessageStore::in_memory().load("nope").is_none());
    }

    #[test]
    fn save_upserts_by_id_and_keeps_order() {
        let store = MessageStore::in_memory();
        store
            .save("s", vec![msg(Some(0), "a", false), msg(Some(1), "b", false)])
            .unwrap();
        store
            .save("s", vec![msg(Some(0), "a", true), msg(Some(2), "c", false)])
            .unwrap();

        let stored = store.load("s").unwrap();
        assert_eq!(texts(&stored), ["a", "b", "c"]);
        assert!(stored[0].hidden);
    }

    #[test]
    fn save_assigns_missing_ids() {
        let store = MessageStore::in_memory();
        store
            .save("s", vec![msg(Some(4), "a", false), msg(None, "b", false)])
            .unwrap();
        let stored = store.load("s").unwrap();
        assert_eq!(stored[1].id, Some(RecordId(5)));
    }

    #[test]
    fn purge_removes_hidden_and_listed_but_keeps_summary() {
        let store = MessageStore::in_memory();
        let mut summary = msg(Some(3), "sum", true);
        summary.kind = Some(RecordKind::Summary);
        store
            .save(
                "s",
                vec![
                    msg(Some(0), "hidden", true),
                    msg(Some(1), "stale visible copy", false),
                    msg(Some(2), "keep", false),
                    summary,
                ],
            )
            .unwrap();

        let removed = store.purge_hidden("s", &[RecordId(1)]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(texts(&store.load("s").unwrap()), ["keep", "sum"]);
    }

    #[test]
    fn space_keys_are_path_safe() {
        assert_eq!(space_key("monday"), "monday");
        assert_eq!(space_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(space_key("  "), "unknown");
    }

    #[test]
    fn data_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MessageStore::with_data_dir(dir.path()).unwrap();
            store
                .save("monday", vec![msg(Some(0), "a", false), msg(Some(1), "b", true)])
                .unwrap();
            store.purge_hidden("monday", &[]).unwrap();
        }
        assert!(dir.path().join("monday.json").exists());
        assert!(!dir.path().join(".monday.json.tmp").exists());

        let reopened = MessageStore::with_data_dir(dir.path()).unwrap();
        assert_eq!(texts(&reopened.load("monday").unwrap()), ["a"]);
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let store = MessageStore::with_data_dir(&data).unwrap();
        store.save("s", vec![msg(Some(0), "a", false)]).unwrap();

        std::fs::remove_dir_all(&data).unwrap();
        assert!(store.save("s", vec![msg(Some(0), "changed", true)]).is_err());
        assert!(store.save("other", vec![msg(Some(0), "x", false)]).is_err());

        let stored = store.load("s").unwrap();
        assert_eq!(texts(&stored), ["a"]);
        assert!(!stored[0].hidden);
        assert!(store.load("other").is_none());
    }

    #[test]
    fn failed_purge_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let store = MessageStore::with_data_dir(&data).unwrap();
        store
            .save("s", vec![msg(Some(0), "a", true), msg(Some(1), "b", false)])
            .unwrap();

        std::fs::remove_dir_all(&data).unwrap();
        assert!(store.purge_hidden("s", &[]).is_err());
        assert_eq!(texts(&store.load("s").unwrap()), ["a", "b"]);
    }

    #[test]
    fn legacy_files_without_ids_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("old.json"),
            r#"[{"role":"user","text":"x"},{"role":"assistant","text":"y"}]"#,
        )
        .unwrap();
        let store = MessageStore::with_data_dir(dir.path()).unwrap();
        let ids: Vec<_> = store.load("old").unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, [Some(RecordId(0)), Some(RecordId(1))]);
    }
}
