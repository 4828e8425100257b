//! Forward-only lifecycle state of the peer group manager.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::PeerGroupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    New = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Terminated = 4,
}

impl State {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => State::New,
            1 => State::Starting,
            2 => State::Running,
            3 => State::Stopping,
            _ => State::Terminated,
        }
    }
}

/// Atomic state holder. Transitions must strictly increase the ordinal.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(State::New.ordinal()))
    }

    pub(crate) fn get(&self) -> State {
        State::from_ordinal(self.0.load(Ordering::SeqCst))
    }

    /// Move to `to`. Fails without changing anything if `to` does not have
    /// a higher ordinal than the current state.
    pub(crate) fn advance(&self, to: State) -> Result<State, PeerGroupError> {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if to.ordinal() <= current {
                return Err(PeerGroupError::InvalidStateTransition {
                    from: State::from_ordinal(current),
                    to,
                });
            }
            match self
                .0
                .compare_exchange(current, to.ordinal(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(previous) => return Ok(State::from_ordinal(previous)),
                Err(actual) => current = actual,
            }
        }
    }
}
