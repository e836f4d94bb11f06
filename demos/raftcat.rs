//! A complex networked example as a command-line tool.
//!
//! Lines read from stdin are proposed to the group, and committed lines are written to stdout on every node.
//! Peers exchange length-prefixed JSON messages over TCP.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::error::Error;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes};
use rand::rngs::OsRng;

use flotilla::config::Config;
use flotilla::consensus::{Actions, Consensus, ConsensusTimeout};
use flotilla::error::ProposeError;
use flotilla::log::memory::InMemoryLog;
use flotilla::message::{Message, MessageDestination, SendableMessage};
use flotilla::state_machine::StateMachine;

const RAFT_CONFIG: Config = Config {
    election_timeout_min: 500,
    election_timeout_max: 1000,
    heartbeat_interval: 250,
    max_payload_entries: 1024,
};

type NodeId = String;

#[derive(Clone)]
enum IncomingMessage {
    Propose(Bytes),
    Message(NetworkMessage),
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
struct NetworkMessage {
    from: NodeId,
    message: Message<NodeId>,
}

struct Network {
    peers_tx: BTreeMap<NodeId, mpsc::Sender<Message<NodeId>>>,
}

struct Args {
    bind_addr: Option<String>,
    node_id: NodeId,
    peers: BTreeSet<NodeId>,
}

struct EchoStateMachine;

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let Args {
        bind_addr,
        node_id,
        peers,
    } = parse_args();

    let (main_tx, main_rx) = mpsc::channel::<IncomingMessage>();
    if let Some(bind_addr) = bind_addr {
        start_peer_listener(main_tx.clone(), bind_addr);
    }
    let network = start_peer_senders(node_id.clone(), peers.clone());

    // Send lines from stdin to the main thread
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdin_lock = stdin.lock();
        let mut line = String::new();
        while stdin_lock
            .read_line(&mut line)
            .expect("error reading from stdin")
            != 0
        {
            let _ignore = main_tx.send(IncomingMessage::Propose(line.clone().into()));
            line.clear();
        }
    });

    let mut raft = Consensus::new(
        node_id,
        peers,
        InMemoryLog::new(),
        EchoStateMachine,
        OsRng,
        RAFT_CONFIG,
    );

    let stdout = std::io::stdout();
    let mut stdout_lock = stdout.lock();

    let mut timers = BTreeMap::new();
    let mut actions = Actions::new();
    raft.init(&mut actions);
    process_actions(actions, &mut timers, &network);

    loop {
        // A node always keeps at least one timer registered
        let deadline = *timers.values().min().unwrap();
        match main_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(IncomingMessage::Propose(data)) => {
                // Propose log entries from stdin
                let mut actions = Actions::new();
                match raft.propose(data, &mut actions) {
                    Ok(proposal) => log::debug!("proposed entry {}", proposal.index),
                    Err(ProposeError::NotLeader {
                        leader: Some(leader),
                    }) => log::info!("not the leader, redirect to {}", leader),
                    Err(ProposeError::NotLeader { leader: None }) => {
                        log::info!("not the leader, and no leader is known yet")
                    }
                    Err(ProposeError::Storage(error)) => log::error!("raft log error: {:?}", error),
                }
                process_actions(actions, &mut timers, &network);
            }
            Ok(IncomingMessage::Message(NetworkMessage { from, message })) => {
                // Process incoming message
                let mut actions = Actions::new();
                raft.on_message(from, message, &mut actions)
                    .expect("error driving consensus");
                process_actions(actions, &mut timers, &network);
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
                    raft.on_timeout(timeout, &mut actions)
                        .expect("error driving consensus");
                    process_actions(actions, &mut timers, &network);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => panic!("child threads died"),
        }

        // Write applied entries to stdout
        for (_, output) in raft.take_applied() {
            if !output.is_empty() {
                stdout_lock
                    .write(&output)
                    .expect("error writing to stdout");
            }
        }
    }
}

fn process_actions(
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
        network.send(sendable);
    }
}

fn parse_args() -> Args {
    let mut args = std::env::args();
    let executable_name = args.next().unwrap_or_default();

    let (bind_addr, node_id) = match (args.next(), args.next()) {
        (Some(first_arg), _) if first_arg.starts_with('-') => usage(&executable_name),
        (Some(_), None) => usage(&executable_name),
        (Some(bind_addr), Some(node_id)) => (Some(bind_addr), node_id),
        (None, _) => (None, String::new()),
    };

    let peers = args.collect::<BTreeSet<_>>();

    Args {
        bind_addr,
        node_id,
        peers,
    }
}

fn usage(executable_name: &str) -> ! {
    eprint!(
        concat!(
            "Usage: {} [-h] [[bind_addr:]port node_host:port] [peer_host:port ...]\n",
            "\n",
            "[bind_addr:]port - the host:port to listen on\n",
            "node_host:port   - the public host:port of this node\n",
            "peer_host:port   - the public host:port of any peers\n",
        ),
        executable_name
    );
    std::process::exit(1)
}

fn start_peer_listener(main_tx: mpsc::Sender<IncomingMessage>, bind_addr: String) {
    let bind_addr = if bind_addr.contains(':') {
        bind_addr
    } else {
        format!("0.0.0.0:{}", bind_addr)
    };
    let listener = TcpListener::bind(&bind_addr)
        .unwrap_or_else(|error| panic!("error listening on {}: {}", bind_addr, error));
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            start_peer_receiver(
                BufReader::new(stream.expect("error accepting connection")),
                main_tx.clone(),
            );
        }
    });
}

fn start_peer_receiver(mut reader: BufReader<TcpStream>, main_tx: mpsc::Sender<IncomingMessage>) {
    std::thread::spawn(move || {
        let addr = reader.get_mut().peer_addr().unwrap();
        log::info!("accepted connection from {}", addr);
        while let Ok(message) = read_peer_message(&mut reader)
            .map_err(|error| log::info!("error receiving from {}: {}", addr, error))
        {
            let _ignore = main_tx.send(IncomingMessage::Message(message));
        }
    });
}

fn read_peer_message(reader: &mut BufReader<TcpStream>) -> Result<NetworkMessage, Box<dyn Error>> {
    let mut len_data = [0; 4];
    reader.read_exact(&mut len_data)?;
    let mut message_data = vec![0; u32::from_be_bytes(len_data) as usize];
    reader.read_exact(&mut message_data)?;
    let message: NetworkMessage = serde_json::from_slice(&message_data)
        .map_err(|error| format!("invalid message from peer: {}", error))?;
    log::debug!("{} -> self: {}", &message.from, &message.message);
    Ok(message)
}

fn start_peer_senders(node_id: NodeId, peers: BTreeSet<NodeId>) -> Network {
    let (peers_tx, peers_rx): (BTreeMap<_, _>, Vec<_>) = peers
        .iter()
        .map(|peer_id| {
            let (peer_tx, peer_rx) = mpsc::channel();
            ((peer_id.clone(), peer_tx), (peer_id.clone(), peer_rx))
        })
        .unzip();

    for (peer_id, peer_rx) in peers_rx {
        start_peer_sender(node_id.clone(), peer_id, peer_rx);
    }

    Network { peers_tx }
}

fn start_peer_sender(from: NodeId, address: String, peer_rx: mpsc::Receiver<Message<NodeId>>) {
    std::thread::spawn(move || {
        let mut connection = None;
        let mut data = Vec::new();
        loop {
            let message = match peer_rx
                .recv_timeout(Duration::from_millis(RAFT_CONFIG.election_timeout_min))
            {
                Ok(message) => Some(NetworkMessage {
                    from: from.clone(),
                    message,
                }),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };

            if connection.is_none() {
                match TcpStream::connect(&address) {
                    Ok(established_connection) => {
                        log::info!("connected to {}", &address);
                        let _ignore = established_connection.set_nodelay(true);
                        connection = Some(established_connection);
                    }
                    Err(error) => log::info!("error connecting to {}: {}", &address, error),
                }
            }
            if let (Some(established_connection), Some(message)) = (&mut connection, &message) {
                let message_data = serde_json::to_vec(message).expect("error encoding message");
                data.clear();
                data.put_u32(message_data.len() as u32);
                data.extend_from_slice(&message_data);
                if let Err(error) = established_connection.write_all(&data) {
                    log::info!("error sending to {}: {}", &address, error);
                    connection = None;
                }
            }
        }
    });
}

//
// Network impls
//

impl Network {
    fn send(&self, sendable: SendableMessage<NodeId>) {
        match sendable.dest {
            MessageDestination::Broadcast => {
                log::debug!("self -> all: {}", sendable.message);
                self.peers_tx
                    .values()
                    .for_each(|peer_tx| drop(peer_tx.send(sendable.message.clone())));
            }
            MessageDestination::To(dst_id) => {
                log::debug!("self -> {}: {}", dst_id, sendable.message);
                let _ = self.peers_tx[&dst_id].send(sendable.message);
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
