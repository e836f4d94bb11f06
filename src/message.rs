//! Message types exchanged between consensus nodes.
//!
//! This module provides data types for messages to be sent between the nodes of a consensus group. The top-level
//! message type is [`Message`]. All types in this module derive `serde::Serialize` and `serde::Deserialize` if the
//! `serde` feature is enabled, for use by transports which encode messages with `serde`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use bytes::Bytes;

/// A [`Message`] to be sent to a destination.
pub struct SendableMessage<N> {
    /// The message to be sent.
    pub message: Message<N>,

    /// The destination for the message.
    pub dest: MessageDestination<N>,
}

/// The destination for a [`SendableMessage`].
pub enum MessageDestination<N> {
    /// The associated message should be sent to all known peers.
    Broadcast,
    /// The associated message should be sent to one particular peer.
    To(N),
}

/// A message sent between consensus nodes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message<N> {
    /// The greatest leadership term ID seen by the sender.
    pub term: TermId,

    /// The Remote Procedure Call contained by this message.
    pub rpc: Rpc<N>,
}

/// A Remote Procedure Call message to a consensus node.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rpc<N> {
    /// A request to obtain leadership of the consensus group.
    VoteRequest(VoteRequest<N>),

    /// A response to a [`VoteRequest`] granting or denying leadership.
    VoteResponse(VoteResponse),

    /// A request to append entries to a node's log.
    AppendRequest(AppendRequest<N>),

    /// A response to an [`AppendRequest`] allowing or denying an append to the node's log.
    AppendResponse(AppendResponse),
}

/// A request to obtain leadership of the consensus group.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteRequest<N> {
    /// The ID of the node requesting the vote.
    pub candidate_id: N,

    /// The log index of the last log entry stored by the candidate.
    pub last_log_idx: LogIndex,

    /// The leadership term of the last log entry stored by the candidate.
    pub last_log_term: TermId,
}

/// The response to a [`VoteRequest`] granting or denying leadership.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteResponse {
    /// Whether the [`VoteRequest`] was granted or not.
    pub vote_granted: bool,
}

/// A request to append entries to a node's log.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppendRequest<N> {
    /// The ID of the leader issuing the request.
    pub leader_id: N,

    /// The log index immediately before the index of the first entry in [`entries`](Self::entries).
    pub prev_log_idx: LogIndex,

    /// The leadership term of the log entry immediately before the first entry in [`entries`](Self::entries).
    pub prev_log_term: TermId,

    /// The log index of the last log entry known by the requester to be committed.
    pub leader_commit: LogIndex,

    /// A list of consecutive log entries to append.
    pub entries: Vec<LogEntry>,
}

/// The response to an [`AppendRequest`] allowing or denying an append to the node's log.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppendResponse {
    /// Whether the [`AppendRequest`] was granted or not.
    pub success: bool,

    /// The log index of the last log entry up to which the responder's log is known to match the requester's log.
    pub match_idx: LogIndex,

    /// The log index of the last log entry in the responder's log.
    pub last_log_idx: LogIndex,
}

/// An entry in a [log][crate::log::Log].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// The term of leadership of the node which appended this log entry.
    pub term: TermId,

    /// Arbitrary data associated with the log entry.
    pub data: Bytes,
}

/// The unique, monotonically-increasing ID for a term of group leadership.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TermId {
    /// The non-negative integer assigned to this term.
    pub id: u64,
}

/// A 1-based index into a [log][crate::log::Log].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogIndex {
    /// The integer representing this log index.
    pub id: u64,
}

//
// Message impls
//

impl<N: fmt::Display> fmt::Display for Message<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, rpc } = self;
        fmt.debug_tuple("")
            .field(&format_args!("{}", term))
            .field(&format_args!("{}", rpc))
            .finish()
    }
}

//
// Rpc impls
//

impl<N: fmt::Display> fmt::Display for Rpc<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Rpc::VoteRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::VoteResponse(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AppendRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AppendResponse(msg) => fmt::Display::fmt(msg, fmt),
        }
    }
}

//
// VoteRequest impls
//

impl<N: fmt::Display> fmt::Display for VoteRequest<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            candidate_id,
            last_log_idx,
            last_log_term,
        } = self;
        fmt.debug_struct("VoteRequest")
            .field("candidate_id", &format_args!("{}", candidate_id))
            .field("last_log_idx", &format_args!("{}", last_log_idx))
            .field("last_log_term", &format_args!("{}", last_log_term))
            .finish()
    }
}

//
// VoteResponse impls
//

impl fmt::Display for VoteResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { vote_granted } = self;
        fmt.debug_struct("VoteResponse")
            .field("vote_granted", vote_granted)
            .finish()
    }
}

//
// AppendRequest impls
//

impl<N: fmt::Display> fmt::Display for AppendRequest<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            leader_id,
            prev_log_idx,
            prev_log_term,
            leader_commit,
            entries,
        } = self;
        fmt.debug_struct("AppendRequest")
            .field("leader_id", &format_args!("{}", leader_id))
            .field("prev_log_idx", &format_args!("{}", prev_log_idx))
            .field("prev_log_term", &format_args!("{}", prev_log_term))
            .field("leader_commit", &format_args!("{}", leader_commit))
            .field("entries", &entries.len())
            .finish()
    }
}

//
// AppendResponse impls
//

impl fmt::Display for AppendResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            success,
            match_idx,
            last_log_idx,
        } = self;
        fmt.debug_struct("AppendResponse")
            .field("success", &success)
            .field("match_idx", &format_args!("{}", match_idx))
            .field("last_log_idx", &format_args!("{}", last_log_idx))
            .finish()
    }
}

//
// TermId impls
//

impl fmt::Display for TermId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("TermId").field(id).finish()
    }
}

impl PartialOrd for TermId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl AddAssign<u64> for TermId {
    fn add_assign(&mut self, rhs: u64) {
        self.id = self
            .id
            .checked_add(rhs)
            .unwrap_or_else(|| panic!("overflow"));
    }
}

//
// LogIndex impls
//

impl LogIndex {
    /// Subtraction with a non-negative integer, checking for overflow. Returns `self - dec`, or `None` if an overflow
    /// occurred.
    pub fn checked_sub(self, dec: u64) -> Option<Self> {
        if let Some(id) = self.id.checked_sub(dec) {
            Some(Self { id })
        } else {
            None
        }
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("LogIdx").field(id).finish()
    }
}

impl PartialOrd for LogIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Add<u64> for LogIndex {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self {
            id: self
                .id
                .checked_add(inc)
                .unwrap_or_else(|| panic!("overflow")),
        }
    }
}

impl Sub<u64> for LogIndex {
    type Output = Self;
    fn sub(self, dec: u64) -> Self {
        Self {
            id: self.id.saturating_sub(dec),
        }
    }
}
