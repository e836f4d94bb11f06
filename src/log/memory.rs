//! A naive in-memory implementation of [`Log`](super::Log), primarily for testing.

use std::convert::{TryFrom, TryInto};

use crate::message::{LogEntry, LogIndex, TermId};

use super::Log;

/// A naive in-memory implementation of [`Log`](super::Log), primarily for testing.
///
/// Entries and metadata are stored on the heap; "durability" lasts exactly as long as the value does.
pub struct InMemoryLog<N> {
    entries: Vec<LogEntry>,
    term: TermId,
    voted_for: Option<N>,
}

impl<N> InMemoryLog<N> {
    /// Constructs an empty log with no persisted metadata.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            term: TermId::default(),
            voted_for: None,
        }
    }

    fn entry_index(&self, log_idx: LogIndex) -> Option<usize> {
        log_idx.id.checked_sub(1)?.try_into().ok()
    }
}

impl<N> Default for InMemoryLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone> Log for InMemoryLog<N> {
    type NodeId = N;
    type Error = ();

    fn append(&mut self, mut log_entries: Vec<LogEntry>) -> Result<(), Self::Error> {
        self.entries.append(&mut log_entries);
        Ok(())
    }

    fn truncate_from(&mut self, from_log_idx: LogIndex) -> Result<usize, ()> {
        let from_index = self.entry_index(from_log_idx).ok_or(())?;
        match self.entries.len().checked_sub(from_index) {
            Some(0) | None => Err(()),
            Some(truncated_len) => {
                self.entries.truncate(from_index);
                Ok(truncated_len)
            }
        }
    }

    fn get(&mut self, log_idx: LogIndex) -> Option<LogEntry> {
        let index = self.entry_index(log_idx)?;
        self.entries.get(index).cloned()
    }

    fn last_index(&self) -> LogIndex {
        let entries_len = u64::try_from(self.entries.len())
            .unwrap_or_else(|_| panic!("more than 2^64 log entries"));
        LogIndex::default() + entries_len
    }

    fn last_term(&self) -> TermId {
        self.entries
            .last()
            .map(|log_entry: &LogEntry| log_entry.term)
            .unwrap_or_default()
    }

    fn persist_meta(&mut self, term: TermId, voted_for: Option<&N>) -> Result<(), Self::Error> {
        self.term = term;
        self.voted_for = voted_for.cloned();
        Ok(())
    }

    fn load_meta(&self) -> (TermId, Option<N>) {
        (self.term, self.voted_for.clone())
    }
}
