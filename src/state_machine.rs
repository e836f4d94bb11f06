//! Types related to the application state machine.
//!
//! Committed log entries are applied, in log order, to a state machine supplied to
//! [`Consensus`](crate::consensus::Consensus). The state machine is the application's half of the replication
//! bargain: consensus guarantees every node applies the same entries in the same order, and the state machine
//! guarantees that applying the same entries in the same order produces the same state.

use std::convert::Infallible;

use bytes::Bytes;

/// An interface for the deterministic state machine to which committed log entries are applied.
pub trait StateMachine {
    /// The type of value produced by applying an entry.
    type Output;

    /// The type of error returned by a failed application.
    type Error;

    /// Applies the data of a committed log entry to the state machine, returning the output of the application.
    ///
    /// Application must be deterministic: the output and state transition may depend only on the current state and
    /// `data`. Entries are applied exactly once, in log order, per run of the process; after a restart, previously
    /// applied entries are applied again on a fresh state machine.
    ///
    /// # Errors
    ///
    /// If the entry could not be applied, an error is returned. An application error is a contract violation fatal
    /// to the node, not a way to reject unwanted commands; commands which may fail validation should record their
    /// failure in the state machine instead.
    fn apply(&mut self, data: &Bytes) -> Result<Self::Output, Self::Error>;
}

/// A [`StateMachine`] which ignores all applied entries, for consensus groups used only for leader election or
/// testing.
pub struct NullStateMachine;

impl StateMachine for NullStateMachine {
    type Output = ();
    type Error = Infallible;

    fn apply(&mut self, _data: &Bytes) -> Result<(), Infallible> {
        Ok(())
    }
}
