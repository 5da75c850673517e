//! Progress reporting
//!
//! Runtimes report install progress through a [`ProgressSink`] as it
//! happens. The daemon's trace registry implements the sink so a trace log
//! mirrors progress live.

use pipewright_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex, PoisonError};

/// Receiver of progress entries
pub trait ProgressSink: Send + Sync {
    /// Records one progress entry
    fn report(&self, entry: LogEntry);
}

/// In-memory progress collector
///
/// Uses `Arc<Mutex<Vec<LogEntry>>>` so clones share one buffer across tasks.
#[derive(Clone, Default)]
pub struct InMemoryProgress {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected entries and clears the buffer
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }

    /// Messages collected so far, without draining
    pub fn messages(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().map(|entry| entry.message.clone()).collect()
    }
}

impl ProgressSink for InMemoryProgress {
    fn report(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let progress = InMemoryProgress::new();
        progress.report(LogEntry::info("fetching"));
        progress.report(LogEntry::error("failed"));

        assert_eq!(progress.messages(), vec!["fetching", "failed"]);

        let drained = progress.drain();
        assert_eq!(drained.len(), 2);
        assert!(progress.drain().is_empty());
    }
}
