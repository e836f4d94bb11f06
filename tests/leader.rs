use common::*;
use flotilla::message::{LogIndex, Message, Rpc, TermId, VoteRequest, VoteResponse};

mod common;

#[test]
pub fn append_request_update_leader() {
    let mut raft = raft(1, vec![2], None, &mut init_random());
    assert!(!raft.is_leader());
    let (_, mut term) = raft.leader();
    term += 1;

    send(&mut raft, 2, term, heartbeat_from(2));
    assert_eq!(raft.leader(), (Some(&2.into()), term));
}

#[test]
pub fn no_update_leader() {
    for rpc in rpc_types()
        .iter()
        .cloned()
        .filter(|rpc| !matches!(rpc, Rpc::AppendRequest(_)))
    {
        let mut raft = raft(1, vec![2, 3], None, &mut init_random());
        let mut term = TermId::default();
        assert_eq!(raft.leader(), (None, term));

        term += 1;
        send(&mut raft, 2, term, rpc);
        assert_eq!(raft.leader(), (None, term));
    }
}

#[test]
pub fn leader_cleared_on_new_term() {
    let mut raft = raft(1, vec![2, 3], None, &mut init_random());
    let mut term = TermId::default();
    term += 1;
    send(&mut raft, 2, term, heartbeat_from(2));
    assert_eq!(raft.leader(), (Some(&2.into()), term));

    term += 1;
    send(
        &mut raft,
        3,
        term,
        Rpc::VoteRequest(VoteRequest {
            candidate_id: 3.into(),
            last_log_idx: LogIndex::default(),
            last_log_term: TermId::default(),
        }),
    );
    assert_eq!(raft.leader(), (None, term));
}

#[test]
#[should_panic]
pub fn append_request_as_leader() {
    let mut raft = raft(1, vec![2], None, &mut init_random());
    let Message { term, .. } = election_timeout(&mut raft).messages.remove(0).message;
    send(
        &mut raft,
        2,
        term,
        Rpc::VoteResponse(VoteResponse { vote_granted: true }),
    );
    assert!(raft.is_leader());

    send(&mut raft, 2, term, heartbeat_from(2));
}
