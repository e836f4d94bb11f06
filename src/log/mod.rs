//! Types related to log storage.
//!
//! Consensus requires a backing storage for entries of its replicated log, as well as for the small amount of
//! per-node metadata which must survive restarts. The [`Log`] trait is implemented for that purpose, and the
//! implementation is supplied to [`Consensus`](crate::consensus::Consensus).

use crate::message::{LogEntry, LogIndex, TermId};

pub mod memory;

/// An interface for storage of the replicated log and durable metadata of a node.
///
/// # Initial state
///
/// A log is initialized as empty, with [`last_index`] returning
/// [`LogIndex::default()`](crate::message::LogIndex::default). The index of the first appended log entry is `1` and
/// all indices are contiguous. [`load_meta`] of a freshly-initialized log returns
/// `(TermId::default(), None)`.
///
/// # Durability
///
/// [`append`], [`truncate_from`], and [`persist_meta`] must make their effects durable before returning `Ok`;
/// consensus acknowledges votes and replicated entries on the strength of those return values.
///
/// [`append`]: Self::append
/// [`truncate_from`]: Self::truncate_from
/// [`persist_meta`]: Self::persist_meta
/// [`load_meta`]: Self::load_meta
/// [`last_index`]: Self::last_index
pub trait Log {
    /// The type of node ID stored in the log's metadata.
    type NodeId;

    /// The type of error returned by fallible operations.
    type Error;

    /// Appends a batch of entries to the end of the log.
    ///
    /// # Errors
    ///
    /// If there was any error modifying the log, an error is returned.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), Self::Error>;

    /// Removes all entries including and after the entry at index `from_index` from the log. Returns the number of
    /// entries removed.
    ///
    /// # Errors
    ///
    /// If there was any error modifying the log, or if no entries exist at `from_index` or beyond, an error is
    /// returned.
    fn truncate_from(&mut self, from_index: LogIndex) -> Result<usize, Self::Error>;

    /// Returns the entry at a given index, or `None` if the index is zero or greater than the length of the log.
    fn get(&mut self, index: LogIndex) -> Option<LogEntry>;

    /// Returns the term of the entry at a given index, or `None` if the index is zero or greater than the length of
    /// the log.
    fn get_term(&mut self, index: LogIndex) -> Option<TermId> {
        self.get(index).map(|entry: LogEntry| entry.term)
    }

    /// Returns the index of the last entry in the log, or [`LogIndex::default()`](crate::message::LogIndex::default)
    /// if empty.
    fn last_index(&self) -> LogIndex;

    /// Returns the term of the last entry in the log, or [`TermId::default()`](crate::message::TermId::default) if
    /// empty.
    fn last_term(&self) -> TermId;

    /// Durably records the node's current term and the candidate it voted for in that term, if any.
    ///
    /// # Errors
    ///
    /// If there was any error persisting the metadata, an error is returned.
    fn persist_meta(&mut self, term: TermId, voted_for: Option<&Self::NodeId>) -> Result<(), Self::Error>;

    /// Returns the most recently persisted term and vote, or `(TermId::default(), None)` if none have been persisted.
    fn load_meta(&self) -> (TermId, Option<Self::NodeId>);
}

pub(crate) struct LogState<L> {
    log: L,
    pub commit_idx: LogIndex,
    pub last_applied: LogIndex,
}

//
// LogState impls
//

impl<L: Log> LogState<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            commit_idx: LogIndex::default(),
            last_applied: LogIndex::default(),
        }
    }

    pub fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), L::Error> {
        self.log.append(entries)
    }

    pub fn truncate_from(&mut self, from_index: LogIndex) -> Result<usize, L::Error> {
        self.log.truncate_from(from_index)
    }

    pub fn get(&mut self, index: LogIndex) -> Option<LogEntry> {
        if index == LogIndex::default() {
            None
        } else {
            self.log.get(index)
        }
    }

    pub fn get_term(&mut self, index: LogIndex) -> Option<TermId> {
        if index == LogIndex::default() {
            // Index zero is the sentinel before the first entry; its term is the zero term.
            Some(TermId::default())
        } else {
            self.log.get_term(index)
        }
    }

    pub fn last_index(&self) -> LogIndex {
        self.log.last_index()
    }

    pub fn last_term(&self) -> TermId {
        self.log.last_term()
    }

    pub fn persist_meta(&mut self, term: TermId, voted_for: Option<&L::NodeId>) -> Result<(), L::Error> {
        self.log.persist_meta(term, voted_for)
    }

    pub fn load_meta(&self) -> (TermId, Option<L::NodeId>) {
        self.log.load_meta()
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }
}
