//! Bounded newest-first log history with live subscribers.

use std::{collections::VecDeque, fmt};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Maximum number of entries retained.
pub const LOG_CAPACITY: usize = 100;

/// A single timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.message
        )
    }
}

/// Log history shared by every component.
///
/// Appends are serialized under one lock; readers get a snapshot that
/// later appends cannot disturb. Live listeners (the SSE endpoint) receive
/// each entry through a broadcast channel.
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOG_CAPACITY);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY + 1)),
            sender,
        }
    }

    /// Record a message at the front, dropping the oldest past capacity.
    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();

        // Stamp under the lock so timestamps never run backwards in the buffer.
        let entry = {
            let mut entries = self.entries.lock();
            let entry = LogEntry::now(message);
            entries.push_front(entry.clone());
            entries.truncate(LOG_CAPACITY);
            entry
        };

        tracing::info!("{entry}");
        let _ = self.sender.send(entry); // live listeners
    }

    /// Snapshot of all entries, newest first.
    #[must_use]
    pub fn read_all(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Snapshot rendered as `"<RFC3339> - <message>"` lines, newest first.
    #[must_use]
    pub fn formatted(&self) -> Vec<String> {
        self.entries.lock().iter().map(ToString::to_string).collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been logged yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Receiver for entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}
