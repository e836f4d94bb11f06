//! Error types surfaced by a consensus node.

use thiserror::Error;

use crate::message::LogIndex;

/// A fatal error returned by a consensus handler entry point.
///
/// A handler returning this error has failed to make a required state transition durable or to apply a committed
/// entry. Neither failure can be retried or masked without risking acknowledged state; the driver should stop the
/// node and surface the error.
#[derive(Debug, Error)]
pub enum RaftError<L, A> {
    /// An error was returned by the [`Log`](crate::log::Log) implementation while appending, truncating, or
    /// persisting metadata.
    #[error("log storage failed")]
    Storage(L),

    /// The [`StateMachine`](crate::state_machine::StateMachine) failed to apply the committed entry at `index`.
    #[error("state machine failed to apply committed entry {index}")]
    Apply {
        /// The index of the entry whose application failed.
        index: LogIndex,
        /// The error returned by the state machine.
        error: A,
    },
}

/// An error returned while proposing an entry for replication.
#[derive(Debug, Error)]
pub enum ProposeError<N, L> {
    /// This node is not the leader. The proposal should be resubmitted to `leader`, if known, or retried after the
    /// next leader election otherwise.
    #[error("not the leader")]
    NotLeader {
        /// The ID of the most recently known leader, if any.
        leader: Option<N>,
    },

    /// An error was returned by the [`Log`](crate::log::Log) implementation while appending the proposed entry.
    #[error("log storage failed")]
    Storage(L),
}
