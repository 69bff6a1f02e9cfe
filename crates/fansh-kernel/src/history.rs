//! Per-serial output capture and the on-disk command log.
//!
//! Every executed line owns one slot in the store: the literal command, a
//! wall-clock timestamp, and one capture per participating host. Capture
//! writers are background consumers — a stage tees its output into a pipe,
//! and the consumer accumulates until EOF, then publishes the buffer into
//! the slot. The command text is mirrored to a plain-text log file so the
//! line editor can recall it across sessions.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::output::Decorator;

/// Timestamp format used in the log file: `YYYY/MM/DD_HH:MM:SS`.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d_%H:%M:%S";

fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Captured output of one host for one serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCapture {
    /// Accumulated output bytes (lossy UTF-8).
    pub result: String,
    /// Decorator snapshot for re-prefixed replay; `None` for local stages.
    pub decorator: Option<Decorator>,
}

/// Snapshot of one history slot, taken under the store lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub command: String,
    /// Host name → capture, iterated in name order.
    pub hosts: BTreeMap<String, HostCapture>,
}

/// Dense serial → entry mapping, append-only for the session.
pub struct HistoryStore {
    slots: Mutex<Vec<HistoryEntry>>,
    log_file: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(log_file: Option<PathBuf>) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            log_file,
        }
    }

    /// Open (or reset) the slot for a serial before its line runs.
    ///
    /// A builtin-only line leaves its slot empty and un-advanced; the next
    /// line reuses the same serial, so the slot is reset rather than pushed
    /// twice.
    pub fn begin_slot(&self, count: usize, command: &str) {
        let mut slots = self.slots.lock().expect("history lock poisoned");
        let entry = HistoryEntry {
            timestamp: now_stamp(),
            command: command.to_string(),
            hosts: BTreeMap::new(),
        };
        match count.cmp(&slots.len()) {
            std::cmp::Ordering::Less => slots[count] = entry,
            std::cmp::Ordering::Equal => slots.push(entry),
            std::cmp::Ordering::Greater => {
                panic!("history slot {count} opened past end ({})", slots.len())
            }
        }
    }

    /// Publish a host's capture into its slot. The slot must exist.
    pub fn store(&self, count: usize, host: &str, result: String, decorator: Option<Decorator>) {
        let mut slots = self.slots.lock().expect("history lock poisoned");
        let slot = slots
            .get_mut(count)
            .unwrap_or_else(|| panic!("history slot {count} missing"));
        slot.hosts.insert(host.to_string(), HostCapture { result, decorator });
    }

    /// Snapshot a slot for replay.
    pub fn snapshot(&self, count: usize) -> Option<HistoryEntry> {
        self.slots.lock().expect("history lock poisoned").get(count).cloned()
    }

    /// Serial + command text for every slot holding at least one capture.
    pub fn list(&self) -> Vec<(usize, String)> {
        let slots = self.slots.lock().expect("history lock poisoned");
        slots
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.hosts.is_empty())
            .map(|(i, e)| (i, e.command.clone()))
            .collect()
    }

    /// Highest serial holding at least one capture.
    pub fn latest_recorded(&self) -> Option<usize> {
        self.list().last().map(|(i, _)| *i)
    }

    /// Spawn a capture writer for `host` on slot `count`.
    ///
    /// Returns the pipe writer the stage tees into, plus the consumer task
    /// handle. The stage closes the writer on exit and awaits the handle so
    /// the capture is published before the line is declared complete.
    pub fn writer(
        self: &Arc<Self>,
        count: usize,
        host: &str,
        decorator: Option<Decorator>,
    ) -> (crate::pipe::PipeWriter, JoinHandle<()>) {
        let (tx, mut rx) = crate::pipe::pipe();
        let store = Arc::clone(self);
        let host = host.to_string();
        let handle = tokio::spawn(async move {
            let bytes = rx.read_to_end().await;
            let result = String::from_utf8_lossy(&bytes).into_owned();
            store.store(count, &host, result, decorator);
        });
        (tx, handle)
    }

    /// Append one `TIMESTAMP COMMAND` line to the on-disk log.
    pub fn append_log(&self, command: &str) {
        let Some(path) = &self.log_file else { return };
        let open = OpenOptions::new().create(true).append(true).open(path);
        match open {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{} {}", now_stamp(), command) {
                    tracing::warn!("failed to append history log: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to open history log {}: {e}", path.display()),
        }
    }

    /// Read the on-disk log: `(timestamp, command)` per line, oldest first.
    pub fn load_log(&self) -> Vec<(String, String)> {
        let Some(path) = &self.log_file else {
            return Vec::new();
        };
        let Ok(file) = std::fs::File::open(path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| {
                let (stamp, cmd) = line.split_once(' ')?;
                Some((stamp.to_string(), cmd.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_dense_and_resettable() {
        let store = HistoryStore::new(None);
        store.begin_slot(0, "%history");
        // Builtin-only line did not advance; slot 0 is reused.
        store.begin_slot(0, "echo hi");
        store.store(0, "h1", "hi\n".into(), None);
        store.begin_slot(1, "uname");

        let entry = store.snapshot(0).unwrap();
        assert_eq!(entry.command, "echo hi");
        assert_eq!(entry.hosts["h1"].result, "hi\n");
        assert!(store.snapshot(2).is_none());
    }

    #[test]
    #[should_panic(expected = "opened past end")]
    fn sparse_slot_open_is_fatal() {
        let store = HistoryStore::new(None);
        store.begin_slot(3, "echo");
    }

    #[test]
    fn list_skips_empty_slots() {
        let store = HistoryStore::new(None);
        store.begin_slot(0, "echo a");
        store.store(0, "h1", "a\n".into(), None);
        store.begin_slot(1, "%history");
        assert_eq!(store.list(), vec![(0, "echo a".to_string())]);
        assert_eq!(store.latest_recorded(), Some(0));
    }

    #[test]
    fn hosts_iterate_in_name_order() {
        let store = HistoryStore::new(None);
        store.begin_slot(0, "echo hi");
        store.store(0, "h2", "two\n".into(), None);
        store.store(0, "h1", "one\n".into(), None);
        let names: Vec<_> = store.snapshot(0).unwrap().hosts.into_keys().collect();
        assert_eq!(names, ["h1", "h2"]);
    }

    #[tokio::test]
    async fn capture_writer_publishes_on_eof() {
        let store = Arc::new(HistoryStore::new(None));
        store.begin_slot(0, "echo hi");
        let (mut w, handle) = store.writer(0, "h1", None);
        w.write_all(b"hi\n").await.unwrap();
        w.close();
        handle.await.unwrap();
        assert_eq!(store.snapshot(0).unwrap().hosts["h1"].result, "hi\n");
    }

    #[test]
    fn log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let store = HistoryStore::new(Some(path));
        store.append_log("echo one");
        store.append_log("uname | !tr a-z A-Z");

        let loaded = store.load_log();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].1, "echo one");
        assert_eq!(loaded[1].1, "uname | !tr a-z A-Z");
        // Timestamps are monotonic, second precision.
        assert!(loaded[0].0 <= loaded[1].0);
    }
}
