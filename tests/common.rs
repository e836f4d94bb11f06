#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::convert::Infallible;

use bytes::Bytes;
use rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaChaRng;

use flotilla::config::Config;
use flotilla::consensus::{Actions, Consensus, ConsensusTimeout, Proposal};
use flotilla::log::memory::InMemoryLog;
use flotilla::message::{
    AppendRequest, AppendResponse, LogEntry, LogIndex, Message, MessageDestination, Rpc,
    SendableMessage, TermId, VoteRequest, VoteResponse,
};
use flotilla::state_machine::StateMachine;

pub const CONFIG: Config = Config {
    election_timeout_min: 150,
    election_timeout_max: 300,
    heartbeat_interval: 50,
    max_payload_entries: 1024,
};
const RANDOM_SEED: u64 = 0;
const MAX_MILLIS: u64 = 100_000;

pub type TestRaft = Consensus<InMemoryLog<NodeId>, TestStateMachine, ChaChaRng, NodeId>;

pub struct TestRaftGroup {
    pub nodes: Vec<TestRaft>,
    pub timers: Vec<BTreeMap<ConsensusTimeout, u64>>,
    pub time: u64,
    pub config: TestRaftGroupConfig,
    pub dropped_messages: Vec<(NodeId, SendableMessage<NodeId>)>,
}

#[derive(Clone, Default)]
pub struct TestRaftGroupConfig {
    pub drops: BTreeSet<(Option<NodeId>, Option<NodeId>)>,
    pub down: BTreeSet<NodeId>,
}

#[derive(
    Clone, Copy, Debug, derive_more::Display, Eq, derive_more::From, PartialEq, PartialOrd, Ord,
)]
#[display(fmt = "{:?}", self)]
pub struct NodeId(u64);

/// Applies entries by recording them, and echoes each entry back as its output.
#[derive(Default)]
pub struct TestStateMachine {
    pub applied: Vec<Bytes>,
}

pub struct TestLogger;

pub struct TestLoggerContext {
    node_id: Option<NodeId>,
    time: Option<u64>,
}

pub fn rpc_types() -> [Rpc<NodeId>; 4] {
    [
        Rpc::VoteRequest(VoteRequest {
            candidate_id: NodeId(2),
            last_log_idx: Default::default(),
            last_log_term: Default::default(),
        }),
        Rpc::VoteResponse(VoteResponse {
            vote_granted: false,
        }),
        heartbeat_from(2),
        Rpc::AppendResponse(AppendResponse {
            success: false,
            match_idx: Default::default(),
            last_log_idx: Default::default(),
        }),
    ]
}

pub fn heartbeat_from(leader: u64) -> Rpc<NodeId> {
    Rpc::AppendRequest(AppendRequest {
        leader_id: NodeId(leader),
        prev_log_idx: Default::default(),
        prev_log_term: Default::default(),
        leader_commit: Default::default(),
        entries: Vec::new(),
    })
}

pub fn entry(term: u64, data: &str) -> LogEntry {
    LogEntry {
        term: TermId { id: term },
        data: Bytes::copy_from_slice(data.as_bytes()),
    }
}

pub fn init_random() -> ChaChaRng {
    ChaChaRng::seed_from_u64(RANDOM_SEED)
}

pub fn raft(
    node_id: u64,
    peers: Vec<u64>,
    log: Option<InMemoryLog<NodeId>>,
    random: &mut impl RngCore,
) -> TestRaft {
    TestLogger::init();
    Consensus::new(
        NodeId(node_id),
        peers.into_iter().map(NodeId).collect(),
        log.unwrap_or_else(InMemoryLog::new),
        TestStateMachine::default(),
        ChaChaRng::seed_from_u64(random.next_u64()),
        CONFIG,
    )
}

pub fn config() -> TestRaftGroupConfig {
    TestRaftGroupConfig::default()
}

pub fn send(raft: &mut TestRaft, from: u64, term: TermId, rpc: Rpc<NodeId>) -> Actions<NodeId> {
    let mut actions = Actions::new();
    raft.on_message(NodeId(from), Message { term, rpc }, &mut actions)
        .unwrap();
    actions
}

pub fn timeout(raft: &mut TestRaft, timeout: ConsensusTimeout) -> Actions<NodeId> {
    let mut actions = Actions::new();
    raft.on_timeout(timeout, &mut actions).unwrap();
    actions
}

pub fn election_timeout(raft: &mut TestRaft) -> Actions<NodeId> {
    timeout(raft, ConsensusTimeout::Election)
}

pub fn start_election(raft: &mut TestRaft, actions: &mut Actions<NodeId>) {
    raft.on_timeout(ConsensusTimeout::Election, actions).unwrap();
}

pub fn vote_granted(actions: &Actions<NodeId>) -> bool {
    match &actions.messages[..] {
        [SendableMessage {
            message:
                Message {
                    rpc: Rpc::VoteResponse(response),
                    ..
                },
            ..
        }] => response.vote_granted,
        _ => panic!("expected a single vote response"),
    }
}

// Applies the side effects of one handler call: pending timers of the node are cleared and re-registered as the
// actions direct, and outbound messages join the delivery queue.
fn process_actions(
    node_id: NodeId,
    timers: &mut BTreeMap<ConsensusTimeout, u64>,
    time: u64,
    actions: Actions<NodeId>,
    messages: &mut VecDeque<(NodeId, SendableMessage<NodeId>)>,
) {
    if actions.clear_timers {
        timers.clear();
    }
    for registration in actions.timers {
        timers.insert(
            registration.timeout,
            time + registration.duration.as_millis() as u64,
        );
    }
    messages.extend(actions.messages.into_iter().map(|message| (node_id, message)));
}

//
// TestRaftGroup impls
//

impl TestRaftGroup {
    pub fn new(size: u64, random: &mut impl RngCore, config: TestRaftGroupConfig) -> Self {
        let node_ids: Vec<u64> = (0..size).collect();
        let mut group = Self {
            nodes: (node_ids.iter())
                .map(|node_id| raft(*node_id, node_ids.clone(), None, random))
                .collect(),
            timers: (0..size).map(|_| BTreeMap::new()).collect(),
            time: 0,
            config,
            dropped_messages: Default::default(),
        };
        let mut messages = VecDeque::new();
        for node_idx in 0..group.nodes.len() {
            let node_id = NodeId(node_idx as u64);
            TestLogger::set_node_id(Some(node_id));
            let mut actions = Actions::new();
            group.nodes[node_idx].init(&mut actions);
            process_actions(
                node_id,
                &mut group.timers[node_idx],
                group.time,
                actions,
                &mut messages,
            );
        }
        group.deliver(messages);
        group
    }

    pub fn run_until(&mut self, mut until_fun: impl FnMut(&mut Self) -> bool) -> &mut Self {
        let mut millis_remaining = MAX_MILLIS;
        while !until_fun(self) {
            millis_remaining = millis_remaining
                .checked_sub(1)
                .expect("condition failed after maximum simulation length");
            self.advance();
        }
        self
    }

    pub fn run_until_applied(&mut self, mut until_fun: impl FnMut(&Bytes) -> bool) -> &mut Self {
        self.run_until(|group| {
            let applied = group.take_applied();
            applied.iter().any(|(_, output)| until_fun(output))
        })
    }

    pub fn run_for(&mut self, millis: u64) -> &mut Self {
        self.run_for_inspect(millis, |_| ())
    }

    pub fn run_for_inspect(&mut self, millis: u64, mut fun: impl FnMut(&mut Self)) -> &mut Self {
        for _ in 0..millis {
            self.advance();
            fun(self);
        }
        self
    }

    pub fn run_on_node(
        &mut self,
        node_idx: usize,
        fun: impl FnOnce(&mut TestRaft, &mut Actions<NodeId>),
    ) -> &mut Self {
        let node_id = NodeId(node_idx as u64);
        TestLogger::set_node_id(Some(node_id));
        let mut actions = Actions::new();
        fun(&mut self.nodes[node_idx], &mut actions);
        let mut messages = VecDeque::new();
        process_actions(
            node_id,
            &mut self.timers[node_idx],
            self.time,
            actions,
            &mut messages,
        );
        self.deliver(messages);
        self
    }

    pub fn propose_on_leader(&mut self, data: impl Into<Bytes>) -> Proposal {
        let node_idx = self.leader_idx().expect("no leader to propose to");
        let data = data.into();
        let mut proposal = None;
        self.run_on_node(node_idx, |raft, actions| {
            proposal = Some(raft.propose(data, actions).unwrap());
        });
        proposal.unwrap()
    }

    pub fn inspect(&mut self, fun: impl FnOnce(&Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn modify(&mut self, fun: impl FnOnce(&mut Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn take_applied(&mut self) -> Vec<(LogIndex, Bytes)> {
        (self.nodes.iter_mut())
            .flat_map(|node| node.take_applied())
            .collect()
    }

    pub fn has_leader(&self) -> bool {
        self.nodes.iter().any(|node| node.is_leader())
    }

    pub fn leader_idx(&self) -> Option<usize> {
        (self.nodes.iter().enumerate())
            .filter(|(_, node)| node.is_leader())
            .max_by_key(|(_, node)| node.current_term())
            .map(|(node_idx, _)| node_idx)
    }

    // Advances the virtual clock one millisecond: due timers fire in node order, then the messages they and any
    // earlier call produced are delivered until none remain. Messages dropped by the partition configuration on an
    // earlier advance are redelivered once the partition heals.
    fn advance(&mut self) {
        self.time += 1;
        TestLogger::set_time(Some(self.time));
        let mut messages: VecDeque<(NodeId, SendableMessage<NodeId>)> = VecDeque::new();
        messages.extend(self.dropped_messages.drain(..));

        for node_idx in 0..self.nodes.len() {
            let node_id = NodeId(node_idx as u64);
            if self.config.is_node_down(node_id) {
                continue;
            }
            let due: Vec<ConsensusTimeout> = (self.timers[node_idx].iter())
                .filter(|(_, deadline)| **deadline <= self.time)
                .map(|(timeout, _)| *timeout)
                .collect();
            for timeout in due {
                match self.timers[node_idx].get(&timeout) {
                    Some(deadline) if *deadline <= self.time => (),
                    _ => continue,
                }
                self.timers[node_idx].remove(&timeout);
                TestLogger::set_node_id(Some(node_id));
                let mut actions = Actions::new();
                self.nodes[node_idx].on_timeout(timeout, &mut actions).unwrap();
                process_actions(
                    node_id,
                    &mut self.timers[node_idx],
                    self.time,
                    actions,
                    &mut messages,
                );
            }
        }
        self.deliver(messages);
    }

    fn deliver(&mut self, mut messages: VecDeque<(NodeId, SendableMessage<NodeId>)>) {
        while let Some((from, sendable)) = messages.pop_front() {
            let (reply_to_node_id, to_node_count) = match sendable.dest {
                MessageDestination::Broadcast => (None, self.nodes.len().saturating_sub(1)),
                MessageDestination::To(to) => (Some(to), 1),
            };
            let to_idxs: Vec<usize> = (0..self.nodes.len())
                .filter(|node_idx| {
                    let node_id = NodeId(*node_idx as u64);
                    match &reply_to_node_id {
                        Some(to_node_id) => node_id == *to_node_id,
                        None => node_id != from,
                    }
                })
                .collect();

            for (to_idx, message) in Iterator::zip(
                to_idxs.into_iter(),
                itertools::repeat_n(sendable.message, to_node_count),
            ) {
                let to_node_id = NodeId(to_idx as u64);
                TestLogger::set_node_id(Some(to_node_id));
                if !self.config.should_drop(from, to_node_id) {
                    log::info!("<- {} {}", from, message);
                    let mut actions = Actions::new();
                    self.nodes[to_idx]
                        .on_message(from, message, &mut actions)
                        .unwrap();
                    process_actions(
                        to_node_id,
                        &mut self.timers[to_idx],
                        self.time,
                        actions,
                        &mut messages,
                    );
                } else {
                    log::info!("<- {} DROPPED {}", from, message);
                    if let Some(reply_to_node_id) = reply_to_node_id {
                        self.dropped_messages.push((
                            from,
                            SendableMessage {
                                message,
                                dest: MessageDestination::To(reply_to_node_id),
                            },
                        ));
                    }
                }
            }
        }
        TestLogger::set_node_id(None);
    }
}

//
// TestRaftGroupConfig impls
//

impl TestRaftGroupConfig {
    pub fn node_down(mut self, node_id: u64) -> Self {
        self.down.insert(NodeId(node_id));
        self
    }

    pub fn isolate(mut self, node_id: u64) -> Self {
        self.drops.insert((Some(NodeId(node_id)), None));
        self.drops.insert((None, Some(NodeId(node_id))));
        self
    }

    pub fn drop_between(mut self, from: u64, to: u64) -> Self {
        self.drops.insert((Some(NodeId(from)), Some(NodeId(to))));
        self.drops.insert((Some(NodeId(to)), Some(NodeId(from))));
        self
    }

    pub fn drop_to(mut self, node_id: u64) -> Self {
        self.drops.insert((None, Some(NodeId(node_id))));
        self
    }

    pub fn is_node_down(&self, node_id: NodeId) -> bool {
        self.down.contains(&node_id)
    }

    pub fn should_drop(&self, from: NodeId, to: NodeId) -> bool {
        self.drops.contains(&(Some(from), Some(to)))
            || self.drops.contains(&(Some(from), None))
            || self.drops.contains(&(None, Some(to)))
            || self.down.contains(&from)
            || self.down.contains(&to)
    }
}

//
// TestStateMachine impls
//

impl StateMachine for TestStateMachine {
    type Output = Bytes;
    type Error = Infallible;

    fn apply(&mut self, data: &Bytes) -> Result<Bytes, Infallible> {
        self.applied.push(data.clone());
        Ok(data.clone())
    }
}

//
// TestLogger impls
//

thread_local! {
    static LOGGER_CONTEXT: RefCell<TestLoggerContext> = RefCell::new(TestLoggerContext::new());
}

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&Self);
        log::set_max_level(log::LevelFilter::Debug);
    }
    pub fn set_node_id(node_id: Option<NodeId>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().node_id = node_id;
        });
    }
    pub fn set_time(time: Option<u64>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().time = time;
        });
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOGGER_CONTEXT.with(|context| {
            let context = context.borrow();
            if let Some(node_id) = context.node_id {
                if let Some(time) = context.time {
                    eprintln!("{:>6}ms {} {}", time, node_id, record.args());
                } else {
                    eprintln!("   ???ms {} {}", node_id, record.args());
                }
            } else {
                eprintln!("{}", record.args());
            }
        })
    }

    fn flush(&self) {}
}

//
// TestLoggerContext impls
//

impl TestLoggerContext {
    const fn new() -> Self {
        Self {
            node_id: None,
            time: None,
        }
    }
}
