//! The consensus core: leader election, log replication, and entry application.
//!
//! [`Consensus`] holds the complete state of one node of a consensus group. It performs no I/O of its own: the
//! driver (an event loop owned by the embedding application) delivers timer expirations to [`on_timeout`] and peer
//! messages to [`on_message`], and executes the messages and timer registrations each call accumulates in an
//! [`Actions`].
//!
//! [`on_timeout`]: Consensus::on_timeout
//! [`on_message`]: Consensus::on_message

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter;
use std::mem;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::config::Config;
use crate::error::{ProposeError, RaftError};
use crate::log::{Log, LogState};
use crate::message::*;
use crate::state_machine::StateMachine;

use self::LeadershipState::*;

/// The leadership role of a consensus node. Every node is in exactly one role at any time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// The node is passively following a leader, or waiting to hear from one.
    Follower,
    /// The node is soliciting votes to become leader.
    Candidate,
    /// The node is the leader of its current term.
    Leader,
}

/// A kind of timer driving a [`Consensus`] node.
///
/// At most one timer of each kind is pending at a time: registering a kind replaces any pending registration of the
/// same kind.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ConsensusTimeout {
    /// Expires when a follower or candidate has waited long enough without hearing from a leader, triggering an
    /// election.
    Election,
    /// Expires when a leader is due to send heartbeats to its peers.
    Heartbeat,
}

/// A request to the driver to deliver a [`ConsensusTimeout`] after a duration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimerRegistration {
    /// The kind of timeout to deliver.
    pub timeout: ConsensusTimeout,

    /// How long from now to deliver it.
    pub duration: Duration,
}

/// Side effects requested by a [`Consensus`] entry point, to be executed by the driver.
///
/// The driver must process [`clear_timers`](Self::clear_timers) first, cancelling any pending timers of both kinds,
/// and then register each element of [`timers`](Self::timers) in order, where a registration replaces any pending
/// timer of the same kind. Messages reflect state the node had already made durable when they were accumulated; if
/// the entry point returned an error, pending actions may be executed or discarded.
pub struct Actions<N> {
    /// Messages to be sent to peers.
    pub messages: Vec<SendableMessage<N>>,

    /// Timers to be registered, after processing [`clear_timers`](Self::clear_timers).
    pub timers: Vec<TimerRegistration>,

    /// Whether to cancel all pending timers before processing [`timers`](Self::timers).
    pub clear_timers: bool,
}

/// A claim ticket for an entry appended to the leader's log by [`Consensus::propose`].
///
/// The entry is committed once the commit index reaches `index` while the entry at `index` still carries `term`;
/// it is lost if that entry is replaced under a different term.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Proposal {
    /// The index at which the proposed entry was appended.
    pub index: LogIndex,

    /// The leadership term under which the proposed entry was appended.
    pub term: TermId,
}

/// The state of log replication from a leader to one of its peers.
pub struct ReplicationState {
    /// The index of the next log entry to be sent to this peer.
    pub next_idx: LogIndex,

    /// The index of the last log entry up to which the peer's log is known to match this node's log.
    pub match_idx: LogIndex,
}

enum LeadershipState<N> {
    Follower(FollowerState<N>),
    Candidate(CandidateState<N>),
    Leader(LeaderState<N>),
}

struct FollowerState<N> {
    leader: Option<N>,
}

struct CandidateState<N> {
    votes_granted: BTreeSet<N>,
}

struct LeaderState<N> {
    followers: BTreeMap<N, ReplicationState>,
}

/// The complete state of one node of a consensus group.
pub struct Consensus<L, M, Random, N>
where
    M: StateMachine,
{
    node_id: N,
    peers: BTreeSet<N>,
    random: Random,
    config: Config,
    state_machine: M,

    current_term: TermId,
    voted_for: Option<N>,
    leadership: LeadershipState<N>,
    log: LogState<L>,
    applied: Vec<(LogIndex, M::Output)>,
}

//
// Actions impls
//

impl<N> Actions<N> {
    /// Constructs an empty set of actions.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            timers: Vec::new(),
            clear_timers: false,
        }
    }

    pub(crate) fn reset_timers(&mut self) {
        self.clear_timers = true;
        self.timers.clear();
    }
}

impl<N> Default for Actions<N> {
    fn default() -> Self {
        Self::new()
    }
}

//
// Consensus impls
//

impl<L, M, Random, N> Consensus<L, M, Random, N>
where
    L: Log<NodeId = N>,
    M: StateMachine,
    Random: RngCore,
    N: Ord + Clone + fmt::Display,
{
    /// Constructs a consensus node with the specified peers and configuration, recovering its durable term and vote
    /// from `log`.
    ///
    /// Each node in a group must be constructed with the same set of peers and `config`. `peers` may contain
    /// `node_id` or omit it to the same effect. `random` must produce different values on every node in a group.
    /// The returned node registers no timers until [`init`](Self::init) is called.
    pub fn new(
        node_id: N,
        mut peers: BTreeSet<N>,
        log: L,
        state_machine: M,
        random: Random,
        config: Config,
    ) -> Self {
        peers.remove(&node_id);
        let log = LogState::new(log);
        let (current_term, voted_for) = log.load_meta();
        if current_term != TermId::default() {
            info!("recovered {} from stored metadata", &current_term);
        }
        Self {
            node_id,
            peers,
            random,
            config,
            state_machine,
            current_term,
            voted_for,
            leadership: Follower(FollowerState { leader: None }),
            log,
            applied: Vec::new(),
        }
    }

    /// Starts the node's election timer. Must be called once before the first call to any other entry point.
    pub fn init(&mut self, actions: &mut Actions<N>) {
        self.register_election_timer(actions);
    }

    /// Returns the index of the last committed log entry.
    pub fn commit_idx(&self) -> LogIndex {
        self.log.commit_idx
    }

    /// Returns this node's configurable parameters.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the latest leadership term this node has seen.
    pub fn current_term(&self) -> TermId {
        self.current_term
    }

    /// Returns whether this node is the leader of the latest known term.
    pub fn is_leader(&self) -> bool {
        if let Leader(_) = &self.leadership {
            true
        } else {
            false
        }
    }

    /// Returns the index of the last log entry applied to the state machine.
    pub fn last_applied(&self) -> LogIndex {
        self.log.last_applied
    }

    /// Returns the ID of the leader, if there is one, of the latest known term, along with the term.
    pub fn leader(&self) -> (Option<&N>, TermId) {
        let leader = match &self.leadership {
            Follower(follower_state) => follower_state.leader.as_ref(),
            Candidate(_) => None,
            Leader(_) => Some(&self.node_id),
        };
        (leader, self.current_term)
    }

    /// Returns a reference to the log storage.
    pub fn log(&self) -> &L {
        self.log.log()
    }

    /// Returns a mutable reference to the log storage.
    pub fn log_mut(&mut self) -> &mut L {
        self.log.log_mut()
    }

    /// Returns this node's ID.
    pub fn node_id(&self) -> &N {
        &self.node_id
    }

    /// Returns the IDs of this node's peers.
    pub fn peers(&self) -> &BTreeSet<N> {
        &self.peers
    }

    /// Returns the replication state corresponding to the peer with ID `peer_node_id`, if this node is the leader.
    pub fn replication_state(&self, peer_node_id: &N) -> Option<&ReplicationState> {
        if let Leader(leader_state) = &self.leadership {
            leader_state.followers.get(peer_node_id)
        } else {
            None
        }
    }

    /// Returns this node's current leadership role.
    pub fn role(&self) -> Role {
        match &self.leadership {
            Follower(_) => Role::Follower,
            Candidate(_) => Role::Candidate,
            Leader(_) => Role::Leader,
        }
    }

    /// Returns a reference to the application state machine.
    pub fn state_machine(&self) -> &M {
        &self.state_machine
    }

    /// Returns a mutable reference to the application state machine.
    pub fn state_machine_mut(&mut self) -> &mut M {
        &mut self.state_machine
    }

    /// Returns the outputs of entries applied to the state machine since the last call, paired with their log
    /// indices, in log order.
    pub fn take_applied(&mut self) -> Vec<(LogIndex, M::Output)> {
        mem::take(&mut self.applied)
    }

    /// Returns the candidate this node voted for in its current term, if any.
    pub fn voted_for(&self) -> Option<&N> {
        self.voted_for.as_ref()
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
        match timeout {
            ConsensusTimeout::Election => self.election_timeout(actions)?,
            ConsensusTimeout::Heartbeat => self.heartbeat_timeout(actions),
        }
        self.become_leader(actions);
        self.advance_commit_idx();
        self.apply_committed()
    }

    /// Processes receipt of `message` from the peer with ID `from`.
    ///
    /// Messages may be delivered out of order or more than once. Lost unicast messages stall replication to the
    /// affected peer only until the next heartbeat.
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
        if !self.peers.contains(&from) {
            error!("received message from {} for wrong group", &from);
            return Ok(());
        }
        self.update_term(&from, &message, actions)?;
        match message.rpc {
            Rpc::VoteRequest(request) => {
                self.handle_vote_request(message.term, request, from, actions)?
            }
            Rpc::VoteResponse(response) => match self.drop_stale_response(message.term, response) {
                Ok(()) => (),
                Err(response) => self.handle_vote_response(message.term, response, from),
            },
            Rpc::AppendRequest(request) => {
                self.handle_append_request(message.term, request, from, actions)?
            }
            Rpc::AppendResponse(response) => {
                match self.drop_stale_response(message.term, response) {
                    Ok(()) => (),
                    Err(response) => self.handle_append_response(message.term, response, from, actions),
                }
            }
        }
        self.become_leader(actions);
        self.advance_commit_idx();
        self.apply_committed()
    }

    /// Proposes appending an entry with arbitrary `data` to the replicated log.
    ///
    /// The entry is appended to the local log and sent to all peers, but is not guaranteed to ultimately be
    /// committed: it may be superseded if leadership is lost first. The returned [`Proposal`] identifies the entry
    /// so its fate can be tracked against the commit index.
    ///
    /// # Errors
    ///
    /// If this node is not the leader, or the log storage fails, an error is returned.
    pub fn propose(
        &mut self,
        data: Bytes,
        actions: &mut Actions<N>,
    ) -> Result<Proposal, ProposeError<N, L::Error>> {
        if let Leader(_) = &self.leadership {
            let entry = LogEntry {
                term: self.current_term,
                data,
            };
            self.log.append(vec![entry]).map_err(ProposeError::Storage)?;
            let proposal = Proposal {
                index: self.log.last_index(),
                term: self.current_term,
            };
            debug!("proposed entry {} at {}", &proposal.index, &proposal.term);
            self.broadcast_append_entries(actions);
            Ok(proposal)
        } else {
            let (leader, _) = self.leader();
            let leader = leader.cloned();
            Err(ProposeError::NotLeader { leader })
        }
    }

    //
    // state transitions
    //

    // A follower or candidate which has waited out its election timer starts a new election; a candidate starts
    // another one.
    fn election_timeout(
        &mut self,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        match &self.leadership {
            Follower(_) | Candidate(_) => {
                info!("election timeout at {}", &self.current_term);
                self.current_term += 1;
                self.voted_for = Some(self.node_id.clone());
                self.log
                    .persist_meta(self.current_term, self.voted_for.as_ref())
                    .map_err(RaftError::Storage)?;
                let votes_granted = iter::once(self.node_id.clone()).collect();
                self.leadership = Candidate(CandidateState { votes_granted });
                info!("became candidate at {}", &self.current_term);
                self.register_election_timer(actions);

                let message = Message {
                    term: self.current_term,
                    rpc: Rpc::VoteRequest(VoteRequest {
                        candidate_id: self.node_id.clone(),
                        last_log_idx: self.log.last_index(),
                        last_log_term: self.log.last_term(),
                    }),
                };
                actions.messages.push(SendableMessage {
                    message,
                    dest: MessageDestination::Broadcast,
                });
            }
            Leader(_) => {
                debug!("ignored election timeout as leader at {}", &self.current_term);
            }
        }
        Ok(())
    }

    // A leader whose heartbeat timer has expired sends an append request to every peer, with entries for the peers
    // which are behind and empty for the rest.
    fn heartbeat_timeout(&mut self, actions: &mut Actions<N>) {
        if let Leader(_) = &self.leadership {
            debug!("sending heartbeat");
            self.broadcast_append_entries(actions);
            actions.timers.push(TimerRegistration {
                timeout: ConsensusTimeout::Heartbeat,
                duration: self.config.heartbeat_duration(),
            });
        } else {
            debug!("ignored heartbeat timeout at {}", &self.current_term);
        }
    }

    // A candidate holding a quorum of granted votes transitions to leader.
    fn become_leader(&mut self, actions: &mut Actions<N>) {
        if let Candidate(candidate_state) = &self.leadership {
            if candidate_state.votes_granted.len() >= self.quorum_size() {
                info!("became leader at {}", &self.current_term);
                self.leadership = Leader(LeaderState {
                    followers: (self.peers.iter().cloned())
                        .map(|id| {
                            (
                                id,
                                ReplicationState {
                                    next_idx: self.log.last_index() + 1,
                                    match_idx: Default::default(),
                                },
                            )
                        })
                        .collect(),
                });
                actions.reset_timers();
                actions.timers.push(TimerRegistration {
                    timeout: ConsensusTimeout::Heartbeat,
                    duration: self.config.heartbeat_duration(),
                });
                self.broadcast_append_entries(actions);
            }
        }
    }

    // Builds an append request for one peer: entries from the peer's next index, capped by the configured payload
    // limit, or none if the peer is caught up.
    fn append_entries_to(&mut self, to_node_id: N, actions: &mut Actions<N>) {
        if let Leader(leader_state) = &self.leadership {
            let next_idx = match leader_state.followers.get(&to_node_id) {
                Some(replication) => replication.next_idx,
                None => return,
            };
            let last_log_idx = self.log.last_index();
            let prev_log_idx = next_idx - 1;
            let prev_log_term = match self.log.get_term(prev_log_idx) {
                Some(prev_log_term) => prev_log_term,
                None => {
                    error!("missing log {} to send to {}!", &prev_log_idx, &to_node_id);
                    return;
                }
            };

            let mut entries: Vec<LogEntry> = Vec::new();
            let entry_log_idxs = (0..self.config.max_payload_entries)
                .map(|idx| next_idx + idx)
                .take_while(|log_idx| *log_idx <= last_log_idx);
            for entry_log_idx in entry_log_idxs {
                match self.log.get(entry_log_idx) {
                    Some(log_entry) => entries.push(log_entry),
                    None => {
                        error!(
                            "error fetching log {} to send to {}!",
                            &entry_log_idx, &to_node_id
                        );
                        break;
                    }
                }
            }
            let last_entry = prev_log_idx + (entries.len() as u64);

            let message = Message {
                term: self.current_term,
                rpc: Rpc::AppendRequest(AppendRequest {
                    leader_id: self.node_id.clone(),
                    prev_log_idx,
                    prev_log_term,
                    leader_commit: self.log.commit_idx.min(last_entry),
                    entries,
                }),
            };
            actions.messages.push(SendableMessage {
                message,
                dest: MessageDestination::To(to_node_id),
            });
        }
    }

    fn broadcast_append_entries(&mut self, actions: &mut Actions<N>) {
        let followers: Vec<N> = if let Leader(leader_state) = &self.leadership {
            leader_state.followers.keys().cloned().collect()
        } else {
            return;
        };
        for follower in followers {
            self.append_entries_to(follower, actions);
        }
    }

    // A leader advances its commit index to the largest index replicated to a quorum, counting only entries of its
    // own term.
    fn advance_commit_idx(&mut self) {
        if let Leader(leader_state) = &self.leadership {
            let mut match_idxs: Vec<_> = (leader_state.followers.values())
                .map(|follower| follower.match_idx)
                .chain(iter::once(self.log.last_index()))
                .collect();
            match_idxs.sort_unstable();
            let agree_idxs = (match_idxs.into_iter())
                .rev()
                .skip(self.quorum_size() - 1);
            let commit_idx = match agree_idxs.max() {
                Some(agree_idx) => {
                    if self.log.get_term(agree_idx) == Some(self.current_term) {
                        self.log.commit_idx.max(agree_idx)
                    } else {
                        self.log.commit_idx
                    }
                }
                None => self.log.commit_idx,
            };
            if commit_idx != self.log.commit_idx {
                debug!(
                    "committed entries from {} to {}",
                    &self.log.commit_idx, &commit_idx
                );
            }
            self.log.commit_idx = commit_idx;
        }
    }

    // Applies every committed but not yet applied entry, in log order, queueing the outputs.
    fn apply_committed(&mut self) -> Result<(), RaftError<L::Error, M::Error>> {
        while self.log.last_applied < self.log.commit_idx {
            let apply_idx = self.log.last_applied + 1;
            let log_entry = self
                .log
                .get(apply_idx)
                .unwrap_or_else(|| panic!("missing committed log entry {}", apply_idx));
            let output = self
                .state_machine
                .apply(&log_entry.data)
                .map_err(|error| RaftError::Apply {
                    index: apply_idx,
                    error,
                })?;
            debug!("applied entry {} at {}", &apply_idx, &log_entry.term);
            self.log.last_applied = apply_idx;
            self.applied.push((apply_idx, output));
        }
        Ok(())
    }

    //
    // message handlers
    //

    fn handle_vote_request(
        &mut self,
        msg_term: TermId,
        msg: VoteRequest<N>,
        from: N,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        let last_log_idx = self.log.last_index();
        let last_log_term = self.log.last_term();
        let log_ok = (msg.last_log_term > last_log_term)
            || (msg.last_log_term == last_log_term && msg.last_log_idx >= last_log_idx);
        let grant = msg_term == self.current_term
            && log_ok
            && (self.voted_for.as_ref())
                .map(|vote| &msg.candidate_id == vote)
                .unwrap_or(true);
        assert!(msg_term <= self.current_term);

        if grant {
            self.voted_for = Some(msg.candidate_id.clone());
            self.log
                .persist_meta(self.current_term, self.voted_for.as_ref())
                .map_err(RaftError::Storage)?;
            info!(
                "granted vote at {} with {} at {} for node {} with {} at {}",
                &self.current_term,
                &last_log_idx,
                &last_log_term,
                &msg.candidate_id,
                &msg.last_log_idx,
                &msg.last_log_term
            );
            if let Follower(_) = &self.leadership {
                self.register_election_timer(actions);
            }
        } else if msg_term != self.current_term {
            info!(
                "ignored message with {} < current {}: {}",
                &msg_term, &self.current_term, &msg
            );
        } else if let Some(vote) = &self.voted_for {
            info!(
                "rejected vote at {} for node {} as already voted for {}",
                &self.current_term, &msg.candidate_id, vote
            );
        } else {
            info!(
                "rejected vote at {} with {} at {} for node {} with {} at {}",
                &self.current_term,
                &last_log_idx,
                &last_log_term,
                &msg.candidate_id,
                &msg.last_log_idx,
                &msg.last_log_term
            );
        }

        let message = Message {
            term: self.current_term,
            rpc: Rpc::VoteResponse(VoteResponse {
                vote_granted: grant,
            }),
        };
        actions.messages.push(SendableMessage {
            message,
            dest: MessageDestination::To(from),
        });
        Ok(())
    }

    fn handle_vote_response(&mut self, msg_term: TermId, msg: VoteResponse, from: N) {
        assert!(msg_term == self.current_term);
        if let Candidate(candidate_state) = &mut self.leadership {
            if msg.vote_granted {
                info!(
                    "received vote granted from {} at {}",
                    &from, &self.current_term
                );
                candidate_state.votes_granted.insert(from);
            } else {
                info!(
                    "received vote rejected from {} at {}",
                    &from, &self.current_term
                );
            }
        }
    }

    fn handle_append_request(
        &mut self,
        msg_term: TermId,
        msg: AppendRequest<N>,
        from: N,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        let prev_log_idx = msg.prev_log_idx;
        let msg_prev_log_term = msg.prev_log_term;
        let our_prev_log_term = self.log.get_term(prev_log_idx);
        let log_ok =
            prev_log_idx == Default::default() || Some(msg_prev_log_term) == our_prev_log_term;
        assert!(msg_term <= self.current_term);

        if msg_term == self.current_term {
            match &mut self.leadership {
                Candidate(_) => {
                    self.leadership = Follower(FollowerState {
                        leader: Some(msg.leader_id.clone()),
                    });
                    info!("became follower at {} of {}", &self.current_term, &from);
                }
                Follower(follower_state) => {
                    if follower_state.leader.is_none() {
                        info!("became follower at {} of {}", &self.current_term, &from);
                    }
                    follower_state.leader = Some(msg.leader_id.clone());
                }
                Leader(_) => {
                    panic!(
                        "received append request as leader at {} from {}",
                        &self.current_term, &from
                    );
                }
            }
            // any append from the leader of the current term holds off elections
            self.register_election_timer(actions);
        }

        if msg_term < self.current_term || !log_ok {
            if msg_term < self.current_term {
                info!(
                    "ignored message with {} < current {}: {}",
                    &msg_term, &self.current_term, &msg
                );
            } else if let Some(our_prev_log_term) = our_prev_log_term {
                warn!(
                    "rejected append from {} with {} at {}, we have {}",
                    &from, &prev_log_idx, &msg_prev_log_term, &our_prev_log_term
                );
            } else {
                info!(
                    "rejected append from {} with {}, we are behind at {}",
                    &from,
                    &prev_log_idx,
                    self.log.last_index()
                );
            }

            let message = Message {
                term: self.current_term,
                rpc: Rpc::AppendResponse(AppendResponse {
                    success: false,
                    match_idx: LogIndex::default(),
                    last_log_idx: self.log.last_index(),
                }),
            };
            actions.messages.push(SendableMessage {
                message,
                dest: MessageDestination::To(from),
            });
        } else {
            assert!(msg_term == self.current_term);
            assert!(log_ok);

            // Skip entries already stored with a matching term, so duplicated or reordered requests cannot truncate
            // acknowledged entries. Truncate at the first conflict, then append the remainder.
            let mut entries = msg.entries;
            let msg_last_log_idx = prev_log_idx + (entries.len() as u64);
            let mut first_new_offset = entries.len();
            for (offset, entry) in entries.iter().enumerate() {
                let entry_log_idx = prev_log_idx + 1 + (offset as u64);
                match self.log.get_term(entry_log_idx) {
                    Some(our_entry_log_term) if our_entry_log_term == entry.term => (),
                    Some(_) => {
                        assert!(entry_log_idx > self.log.commit_idx);
                        let truncated_len = self
                            .log
                            .truncate_from(entry_log_idx)
                            .map_err(RaftError::Storage)?;
                        info!(
                            "truncated {} conflicting entries from {}",
                            truncated_len, &entry_log_idx
                        );
                        first_new_offset = offset;
                        break;
                    }
                    None => {
                        first_new_offset = offset;
                        break;
                    }
                }
            }
            if first_new_offset < entries.len() {
                let new_entries = entries.split_off(first_new_offset);
                self.log.append(new_entries).map_err(RaftError::Storage)?;
            }

            let leader_commit = msg.leader_commit.min(msg_last_log_idx);
            if leader_commit > self.log.commit_idx {
                debug!(
                    "committed entries from {} to {}",
                    &self.log.commit_idx, &leader_commit
                );
                self.log.commit_idx = leader_commit;
            }

            let message = Message {
                term: self.current_term,
                rpc: Rpc::AppendResponse(AppendResponse {
                    success: true,
                    match_idx: msg_last_log_idx.min(self.log.last_index()),
                    last_log_idx: self.log.last_index(),
                }),
            };
            actions.messages.push(SendableMessage {
                message,
                dest: MessageDestination::To(from),
            });
        }
        Ok(())
    }

    fn handle_append_response(
        &mut self,
        msg_term: TermId,
        msg: AppendResponse,
        from: N,
        actions: &mut Actions<N>,
    ) {
        assert!(msg_term == self.current_term);
        let continue_replication = if let Leader(leader_state) = &mut self.leadership {
            if let Some(replication) = leader_state.followers.get_mut(&from) {
                if msg.success {
                    if msg.match_idx + 1 > replication.next_idx {
                        replication.next_idx = msg.match_idx + 1;
                    }
                    if msg.match_idx > replication.match_idx {
                        replication.match_idx = msg.match_idx;
                    }
                    replication.next_idx <= self.log.last_index()
                } else {
                    info!(
                        "received append rejection at {} from {} having {}",
                        &replication.next_idx, &from, &msg.last_log_idx
                    );
                    replication.next_idx = ((replication.next_idx - 1)
                        .min(msg.last_log_idx + 1))
                    .max(msg.match_idx + 1);
                    true
                }
            } else {
                false
            }
        } else {
            false
        };
        if continue_replication {
            // pick up commits acknowledged by this response before resending
            self.advance_commit_idx();
            self.append_entries_to(from, actions);
        }
    }

    // Any message with a newer term causes the recipient to adopt the term and step down first.
    fn update_term(
        &mut self,
        from: &N,
        message: &Message<N>,
        actions: &mut Actions<N>,
    ) -> Result<(), RaftError<L::Error, M::Error>> {
        if message.term > self.current_term {
            info!(
                "became follower at {} (from {}) due to message from {}: {}",
                &message.term, &self.current_term, from, &message
            );
            let was_leader = self.is_leader();
            self.current_term = message.term;
            self.voted_for = None;
            self.log
                .persist_meta(self.current_term, None)
                .map_err(RaftError::Storage)?;
            self.leadership = Follower(FollowerState { leader: None });
            if was_leader {
                actions.reset_timers();
                self.register_election_timer(actions);
            }
        }
        Ok(())
    }

    // Responses with stale terms are ignored.
    fn drop_stale_response<T>(&self, msg_term: TermId, msg: T) -> Result<(), T>
    where
        T: fmt::Display,
    {
        if msg_term < self.current_term {
            info!(
                "ignored message with {} < current {}: {}",
                &msg_term, &self.current_term, &msg
            );
            Ok(())
        } else {
            Err(msg)
        }
    }

    //
    // helpers
    //

    fn quorum_size(&self) -> usize {
        quorum_size(self.peers.len())
    }

    fn register_election_timer(&mut self, actions: &mut Actions<N>) {
        let duration = random_election_timeout(&mut self.random, &self.config);
        actions.timers.push(TimerRegistration {
            timeout: ConsensusTimeout::Election,
            duration,
        });
    }
}

/// Computes the minimum size of a quorum of nodes in a consensus group.
///
/// Returns the minimum number of nodes out of a group with `peer_count` peers (one node's view of the group,
/// excluding itself) necessary to constitute a quorum. A quorum of reachable nodes is needed to elect a leader and
/// commit entries of the replicated log.
pub fn quorum_size(peer_count: usize) -> usize {
    (peer_count.saturating_add(1)) / 2 + 1
}

fn random_election_timeout(random: &mut impl RngCore, config: &Config) -> Duration {
    let range = config.election_timeout_range();
    let span = range.end.saturating_sub(range.start);
    let jitter = random.next_u64().checked_rem(span).unwrap_or(0);
    Duration::from_millis(range.start.saturating_add(jitter))
}
