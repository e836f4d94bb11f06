//! An example with a thread per consensus node

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;

use flotilla::config::Config;
use flotilla::consensus::{Actions, Consensus, ConsensusTimeout};
use flotilla::log::memory::InMemoryLog;
use flotilla::message::{Message, MessageDestination, SendableMessage};
use flotilla::state_machine::StateMachine;

type NodeId = usize;

const RAFT_CONFIG: Config = Config {
    election_timeout_min: 150,
    election_timeout_max: 300,
    heartbeat_interval: 50,
    max_payload_entries: u64::max_value(),
};

#[derive(Clone)]
struct IncomingMessage {
    from: NodeId,
    message: Message<NodeId>,
}

#[derive(Clone)]
struct Network {
    peers_tx: Vec<mpsc::Sender<IncomingMessage>>,
}

struct EchoStateMachine;

fn main() {
    // Construct 5 peers
    let (peers_tx, peers_rx): (Vec<_>, Vec<_>) = (0..5).map(|_| mpsc::channel()).unzip();
    let network = Network { peers_tx };
    let peers = peers_rx
        .into_iter()
        .enumerate()
        .map(|(peer_id, rx): (NodeId, _)| {
            (
                Consensus::new(
                    peer_id,
                    (0..5).collect(),
                    InMemoryLog::new(),
                    EchoStateMachine,
                    ChaChaRng::seed_from_u64(peer_id as u64),
                    RAFT_CONFIG,
                ),
                rx,
            )
        });

    let proposed = Arc::new(Mutex::new(false));
    let mut peers_applied = vec![false; peers.len()];
    let (peer_applied_tx, peer_applied_rx) = mpsc::channel();

    for (peer_id, (mut peer, rx)) in peers.enumerate() {
        let proposed = Arc::clone(&proposed);
        let network = network.clone();
        let peer_applied_tx = peer_applied_tx.clone();
        thread::spawn(move || {
            let mut timers: BTreeMap<ConsensusTimeout, Instant> = BTreeMap::new();
            let mut actions = Actions::new();
            peer.init(&mut actions);
            process_actions(peer_id, actions, &mut timers, &network);
            loop {
                // A node always keeps at least one timer registered
                let deadline = *timers.values().min().unwrap();
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(message) => {
                        // Process incoming message
                        let mut actions = Actions::new();
                        peer.on_message(message.from, message.message, &mut actions)
                            .unwrap();
                        process_actions(peer_id, actions, &mut timers, &network);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // Fire timers which have come due
                        let now = Instant::now();
                        let due: Vec<ConsensusTimeout> = (timers.iter())
                            .filter(|(_, deadline)| **deadline <= now)
                            .map(|(timeout, _)| *timeout)
                            .collect();
                        for timeout in due {
                            match timers.get(&timeout) {
                                Some(deadline) if *deadline <= now => (),
                                _ => continue,
                            }
                            timers.remove(&timeout);
                            let mut actions = Actions::new();
                            peer.on_timeout(timeout, &mut actions).unwrap();
                            process_actions(peer_id, actions, &mut timers, &network);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        panic!("peer {} disconnected", peer_id)
                    }
                }

                // Propose an entry on the leader
                let mut proposed = proposed.lock().unwrap();
                if !*proposed && peer.is_leader() {
                    let mut actions = Actions::new();
                    if peer
                        .propose(Bytes::from("Hello world!"), &mut actions)
                        .is_ok()
                    {
                        println!("peer {} proposing", peer_id);
                        *proposed = true;
                    }
                    process_actions(peer_id, actions, &mut timers, &network);
                }
                drop(proposed);

                // Check for applied entries
                for (log_idx, output) in peer.take_applied() {
                    println!(
                        "peer {} applied {} at index {}",
                        peer_id,
                        str::from_utf8(&output).unwrap(),
                        log_idx
                    );
                    peer_applied_tx.send(peer_id).unwrap();
                }
            }
        });
    }
    drop((network, peer_applied_tx));

    // Loop until a proposed entry is applied on all peers
    while !peers_applied.iter().all(|seen| *seen) {
        let peer_id = peer_applied_rx.recv().unwrap();
        assert!(!peers_applied[peer_id]);
        peers_applied[peer_id] = true;
    }
}

fn process_actions(
    peer_id: NodeId,
    actions: Actions<NodeId>,
    timers: &mut BTreeMap<ConsensusTimeout, Instant>,
    network: &Network,
) {
    if actions.clear_timers {
        timers.clear();
    }
    let now = Instant::now();
    for registration in actions.timers {
        timers.insert(registration.timeout, now + registration.duration);
    }
    for sendable in actions.messages {
        network.send(peer_id, sendable);
    }
}

//
// Network impls
//

impl Network {
    fn send(&self, from: NodeId, sendable: SendableMessage<NodeId>) {
        let message = IncomingMessage {
            from,
            message: sendable.message,
        };
        match sendable.dest {
            MessageDestination::Broadcast => {
                println!("peer {} -> all: {}", from, message.message);
                (self.peers_tx.iter().enumerate())
                    .filter(|(peer_id, _)| *peer_id != from)
                    .for_each(|(_, peer_tx)| drop(peer_tx.send(message.clone())));
            }
            MessageDestination::To(dst_id) => {
                println!("peer {} -> peer {}: {}", from, dst_id, message.message);
                let _ = self.peers_tx[dst_id].send(message);
            }
        }
    }
}

//
// EchoStateMachine impls
//

impl StateMachine for EchoStateMachine {
    type Output = Bytes;
    type Error = Infallible;

    fn apply(&mut self, data: &Bytes) -> Result<Bytes, Infallible> {
        Ok(data.clone())
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn main() {
        super::main();
    }
}
