//! An implementation of the [Raft](https://raft.github.io/) distributed consensus protocol, detached from any
//! particular transport, storage, or event loop.
//!
//! A [`Consensus`] node performs no I/O of its own. The embedding application supplies:
//!
//! - a [`Log`] implementation holding the node's entries and the per-node metadata which must survive restarts,
//! - a [`StateMachine`] to which committed entries are applied, and
//! - a driver: an event loop which delivers expired timers to [`Consensus::on_timeout`] and received peer messages
//!   to [`Consensus::on_message`], then executes the message sends and timer registrations the call accumulated in
//!   its [`Actions`].
//!
//! Entry points must be called from one thread at a time, and a message handed to the driver may be lost,
//! duplicated, or reordered in flight without affecting safety. Entries are proposed for replication with
//! [`Consensus::propose`] on the node which is currently the leader, and every node surfaces the outputs of
//! applying committed entries through [`Consensus::take_applied`].
//!
//! [`Server`] wraps a [`Consensus`] with tracking of an individual proposal to its outcome.

pub mod config;
pub mod consensus;
pub mod error;
pub mod log;
pub mod message;
pub mod server;
pub mod state_machine;

pub use crate::config::{Config, ConfigError};
pub use crate::consensus::{
    quorum_size, Actions, Consensus, ConsensusTimeout, Proposal, ReplicationState, Role,
    TimerRegistration,
};
pub use crate::error::{ProposeError, RaftError};
pub use crate::log::{memory::InMemoryLog, Log};
pub use crate::message::{
    AppendRequest, AppendResponse, LogEntry, LogIndex, Message, MessageDestination, Rpc,
    SendableMessage, TermId, VoteRequest, VoteResponse,
};
pub use crate::server::{ProposalStatus, Server};
pub use crate::state_machine::{NullStateMachine, StateMachine};
