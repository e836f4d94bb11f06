//! A simple example driving an in-process group with a virtual clock

use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::str;

use bytes::Bytes;
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;

use flotilla::config::Config;
use flotilla::consensus::{Actions, Consensus, ConsensusTimeout};
use flotilla::log::memory::InMemoryLog;
use flotilla::message::{Message, MessageDestination};
use flotilla::state_machine::StateMachine;

type NodeId = usize;

struct EchoStateMachine;

impl StateMachine for EchoStateMachine {
    type Output = Bytes;
    type Error = Infallible;

    fn apply(&mut self, data: &Bytes) -> Result<Bytes, Infallible> {
        Ok(data.clone())
    }
}

fn main() {
    // Construct 5 peers
    let peer_count: usize = 5;
    let mut peers = (0..peer_count)
        .map(|id: NodeId| {
            Consensus::new(
                id,
                (0..peer_count).collect(),
                InMemoryLog::new(),
                EchoStateMachine,
                ChaChaRng::seed_from_u64(id as u64),
                Config::default(),
            )
        })
        .collect::<Vec<_>>();

    // Each peer keeps a deadline per registered timer, and messages are delivered instantaneously
    let mut clock: u64 = 0;
    let mut timers = vec![BTreeMap::new(); peer_count];
    let mut inboxes = vec![VecDeque::new(); peer_count];
    for (peer_id, peer) in peers.iter_mut().enumerate() {
        let mut actions = Actions::new();
        peer.init(&mut actions);
        process_actions(peer_id, clock, actions, &mut timers, &mut inboxes);
    }

    // Loop until a proposed entry is applied on all peers
    let mut proposed = false;
    let mut peers_applied = vec![false; peer_count];
    while !peers_applied.iter().all(|seen| *seen) {
        clock += 1;
        for peer_id in 0..peer_count {
            // Fire timers which have come due
            let due: Vec<ConsensusTimeout> = (timers[peer_id].iter())
                .filter(|(_, deadline)| **deadline <= clock)
                .map(|(timeout, _)| *timeout)
                .collect();
            for timeout in due {
                match timers[peer_id].get(&timeout) {
                    Some(deadline) if *deadline <= clock => (),
                    _ => continue,
                }
                timers[peer_id].remove(&timeout);
                let mut actions = Actions::new();
                peers[peer_id].on_timeout(timeout, &mut actions).unwrap();
                process_actions(peer_id, clock, actions, &mut timers, &mut inboxes);
            }

            // Propose an entry on the leader
            if !proposed && peers[peer_id].is_leader() {
                let mut actions = Actions::new();
                if peers[peer_id]
                    .propose(Bytes::from("Hello world!"), &mut actions)
                    .is_ok()
                {
                    println!("peer {} proposing", peer_id);
                    proposed = true;
                }
                process_actions(peer_id, clock, actions, &mut timers, &mut inboxes);
            }

            // Process message inbox
            while let Some((src_id, message)) = inboxes[peer_id].pop_front() {
                let mut actions = Actions::new();
                peers[peer_id].on_message(src_id, message, &mut actions).unwrap();
                process_actions(peer_id, clock, actions, &mut timers, &mut inboxes);
            }

            // Check for applied entries
            for (log_idx, output) in peers[peer_id].take_applied() {
                println!(
                    "peer {} applied {} at index {}",
                    peer_id,
                    str::from_utf8(&output).unwrap(),
                    log_idx
                );
                assert!(!peers_applied[peer_id]);
                peers_applied[peer_id] = true;
            }
        }
    }
}

fn process_actions(
    peer_id: NodeId,
    clock: u64,
    actions: Actions<NodeId>,
    timers: &mut Vec<BTreeMap<ConsensusTimeout, u64>>,
    inboxes: &mut Vec<VecDeque<(NodeId, Message<NodeId>)>>,
) {
    if actions.clear_timers {
        timers[peer_id].clear();
    }
    for registration in actions.timers {
        timers[peer_id].insert(
            registration.timeout,
            clock + registration.duration.as_millis() as u64,
        );
    }
    for sendable in actions.messages {
        match sendable.dest {
            MessageDestination::Broadcast => {
                println!("peer {} -> all: {}", peer_id, &sendable.message);
                for (inbox_id, inbox) in inboxes.iter_mut().enumerate() {
                    if inbox_id != peer_id {
                        inbox.push_back((peer_id, sendable.message.clone()));
                    }
                }
            }
            MessageDestination::To(dst_id) => {
                println!("peer {} -> peer {}: {}", peer_id, dst_id, &sendable.message);
                inboxes[dst_id].push_back((peer_id, sendable.message));
            }
        }
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn main() {
        super::main();
    }
}
