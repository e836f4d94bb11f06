//! A convenience wrapper bundling the consensus core with proposal tracking.
//!
//! [`Server`] owns a [`Consensus`] node and exposes the subset of its API an embedding application needs to drive
//! it, plus [`proposal_status`](Server::proposal_status) for following an accepted proposal to its outcome. An
//! application needing finer control can use [`Consensus`] directly.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use rand_core::RngCore;

use crate::config::Config;
use crate::consensus::{Actions, Consensus, ConsensusTimeout, Proposal, Role};
use crate::error::{ProposeError, RaftError};
use crate::log::Log;
use crate::message::{LogIndex, Message, TermId};
use crate::state_machine::StateMachine;

/// The outcome, so far, of a [`Proposal`] returned by [`Server::propose`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProposalStatus {
    /// The proposed entry is not yet committed, and not yet known to be lost.
    Pending,
    /// The proposed entry is committed: it has been or will be applied on every node of the group.
    Accepted,
    /// A different entry was committed at the proposed index. The proposal must be retried if it is still wanted.
    Lost,
}

/// One node of a consensus group, bundling a [`Consensus`] core with proposal tracking.
pub struct Server<L, M, Random, N>
where
    M: StateMachine,
{
    consensus: Consensus<L, M, Random, N>,
}

impl<L, M, Random, N> Server<L, M, Random, N>
where
    L: Log<NodeId = N>,
    M: StateMachine,
    Random: RngCore,
    N: Ord + Clone + fmt::Display,
{
    /// Constructs a server with the specified peers and configuration, recovering its durable term and vote from
    /// `log`.
    pub fn new(
        node_id: N,
        peers: BTreeSet<N>,
        log: L,
        state_machine: M,
        random: Random,
        config: Config,
    ) -> Self {
        Self {
            consensus: Consensus::new(node_id, peers, log, state_machine, random, config),
        }
    }

    /// Starts the node's election timer. Must be called once before the first call to any other entry point.
    pub fn init(&mut self, actions: &mut Actions<N>) {
        self.consensus.init(actions);
    }

    /// Processes the expiration of a previously registered timer.
    ///
    /// # Errors
    ///
    /// If the log storage or the state machine fails, an error is returned and the node must not be driven further.
    pub fn on_timeout(
        &mut self,
        timeout: ConsensusTimeout,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        self.consensus.on_timeout(timeout, actions)
    }

    /// Processes receipt of `message` from the peer with ID `from`.
    ///
    /// # Errors
    ///
    /// If the log storage or the state machine fails, an error is returned and the node must not be driven further.
    pub fn on_message(
        &mut self,
        from: N,
        message: Message<N>,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        self.consensus.on_message(from, message, actions)
    }

    /// Proposes appending an entry with arbitrary `data` to the replicated log.
    ///
    /// The returned [`Proposal`] can be polled with [`proposal_status`](Self::proposal_status) to learn whether the
    /// entry was ultimately committed.
    ///
    /// # Errors
    ///
    /// If this node is not the leader, [`ProposeError::NotLeader`] carries the ID of the leader to redirect to, if
    /// there is a known one. If the log storage fails, an error is returned and the node must not be driven
    /// further.
    pub fn propose(
        &mut self,
        data: Bytes,
        actions: &mut Actions<N>,
    ) -> Result<Proposal, ProposeError<N, L::Error>> {
        self.consensus.propose(data, actions)
    }

    /// Returns the outcome, so far, of a proposal previously returned by [`propose`](Self::propose).
    ///
    /// A committed entry is permanent, so [`Accepted`](ProposalStatus::Accepted) and
    /// [`Lost`](ProposalStatus::Lost) are final. [`Pending`](ProposalStatus::Pending) resolves to one or the other
    /// as the commit index advances past the proposed entry, typically within a round trip while the proposing
    /// leader retains leadership.
    pub fn proposal_status(&mut self, proposal: &Proposal) -> ProposalStatus {
        if self.consensus.commit_idx() < proposal.index {
            return ProposalStatus::Pending;
        }
        match self.consensus.log_mut().get_term(proposal.index) {
            Some(term) if term == proposal.term => ProposalStatus::Accepted,
            _ => ProposalStatus::Lost,
        }
    }

    /// Returns the outputs of entries applied to the state machine since the last call, paired with their log
    /// indices, in log order.
    pub fn take_applied(&mut self) -> Vec<(LogIndex, M::Output)> {
        self.consensus.take_applied()
    }

    /// Returns the index of the last committed log entry.
    pub fn commit_idx(&self) -> LogIndex {
        self.consensus.commit_idx()
    }

    /// Returns the latest leadership term this node has seen.
    pub fn current_term(&self) -> TermId {
        self.consensus.current_term()
    }

    /// Returns whether this node is the leader of the latest known term.
    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    /// Returns the index of the last log entry applied to the state machine.
    pub fn last_applied(&self) -> LogIndex {
        self.consensus.last_applied()
    }

    /// Returns the ID of the leader, if there is one, of the latest known term, along with the term.
    pub fn leader(&self) -> (Option<&N>, TermId) {
        self.consensus.leader()
    }

    /// Returns a reference to the log storage.
    pub fn log(&self) -> &L {
        self.consensus.log()
    }

    /// Returns a mutable reference to the log storage.
    pub fn log_mut(&mut self) -> &mut L {
        self.consensus.log_mut()
    }

    /// Returns this node's ID.
    pub fn node_id(&self) -> &N {
        self.consensus.node_id()
    }

    /// Returns the IDs of this node's peers.
    pub fn peers(&self) -> &BTreeSet<N> {
        self.consensus.peers()
    }

    /// Returns this node's current leadership role.
    pub fn role(&self) -> Role {
        self.consensus.role()
    }

    /// Returns a reference to the application state machine.
    pub fn state_machine(&self) -> &M {
        self.consensus.state_machine()
    }

    /// Returns a mutable reference to the application state machine.
    pub fn state_machine_mut(&mut self) -> &mut M {
        self.consensus.state_machine_mut()
    }
}
