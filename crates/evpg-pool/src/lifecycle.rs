//! Connection entry lifecycle.
//!
//! Every entry in the pool inventory carries an atomic [`EntryState`]. All
//! ownership handoffs between threads go through a compare-and-swap on that
//! state: only the thread that wins a transition may act on the outcome, so
//! a connection is never acquired twice and its handle is released once.
//!
//! ```text
//!   Invalid ──> Connecting ──> Available ──> Busy ──> Validating ──> IdleReady
//!      ^            │  ^           │          │           │ │           │
//!      │            │  └───────────┼──────────┼───────────┘ │           │
//!      │            v              v          v             v           │
//!      └──── Disconnecting <───────┴──────────┴─────────────┴───────────┘
//! ```
//!
//! `IdleReady` returns to `Available` in batches when the pool's waker runs.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use evpg_protocol::{Connector, Token};
use parking_lot::Mutex;

use crate::error::PoolError;
use crate::pool::Completion;

/// State of one connection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryState {
    /// No handle. The slot may be reused for a new connection.
    Invalid = 0,
    /// The handle is being released.
    Disconnecting = 1,
    /// Establishment or reset is in progress.
    Connecting = 2,
    /// Idle and ready to be acquired.
    Available = 3,
    /// Owned by a caller or by an in-flight query.
    Busy = 4,
    /// Being checked after release.
    Validating = 5,
    /// Validated, waiting for the next batch promotion to `Available`.
    IdleReady = 6,
}

impl EntryState {
    const ALL: [Self; 7] = [
        Self::Invalid,
        Self::Disconnecting,
        Self::Connecting,
        Self::Available,
        Self::Busy,
        Self::Validating,
        Self::IdleReady,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(Self::Invalid)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        use EntryState::*;
        matches!(
            (self, to),
            (Invalid, Connecting)
                | (Connecting, Available)
                | (Connecting, Disconnecting)
                | (Connecting, Invalid)
                | (Available, Busy)
                | (Available, Disconnecting)
                | (Busy, Validating)
                | (Busy, Disconnecting)
                | (Validating, IdleReady)
                | (Validating, Connecting)
                | (Validating, Disconnecting)
                | (IdleReady, Available)
                | (IdleReady, Disconnecting)
                | (Disconnecting, Invalid)
        )
    }

    /// Whether the entry counts as free when deciding to grow.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Available | Self::Connecting)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Disconnecting => "disconnecting",
            Self::Connecting => "connecting",
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Validating => "validating",
            Self::IdleReady => "idle-ready",
        };
        f.write_str(name)
    }
}

/// Stable identity of an inventory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

impl EntryId {
    /// Reactor token used for this slot's registrations.
    #[must_use]
    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Atomic holder of an [`EntryState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: EntryState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> EntryState {
        EntryState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempt `from -> to`.
    ///
    /// Returns `Ok(true)` if this caller won the transition, `Ok(false)` if
    /// the state was not `from`, and an error if the edge is not part of the
    /// state machine.
    pub(crate) fn transition(&self, from: EntryState, to: EntryState) -> Result<bool, PoolError> {
        if !from.can_transition_to(to) {
            return Err(PoolError::IllegalTransition { from, to });
        }
        Ok(self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Like [`transition`](Self::transition), reporting an illegal edge and
    /// treating it as a lost race.
    pub(crate) fn try_move(&self, from: EntryState, to: EntryState) -> bool {
        match self.transition(from, to) {
            Ok(won) => won,
            Err(err) => {
                tracing::error!(error = %err, "rejected state transition");
                false
            }
        }
    }
}

/// One slot of the pool inventory.
///
/// The handle lives behind its own lock, held only for protocol calls and
/// reactor (un)registration. Ownership of the slot itself is decided by the
/// state cell, never by the lock.
pub(crate) struct ConnectionEntry<K: Connector> {
    id: EntryId,
    state: StateCell,
    pub(crate) conn: Mutex<Option<K::Connection>>,
    pub(crate) in_flight: Mutex<Option<Completion<K>>>,
    created_at: Instant,
}

impl<K: Connector> ConnectionEntry<K> {
    pub(crate) fn new(id: EntryId, state: EntryState) -> Self {
        Self {
            id,
            state: StateCell::new(state),
            conn: Mutex::new(None),
            in_flight: Mutex::new(None),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    pub(crate) fn token(&self) -> Token {
        self.id.token()
    }

    pub(crate) fn state(&self) -> EntryState {
        self.state.load()
    }

    pub(crate) fn try_move(&self, from: EntryState, to: EntryState) -> bool {
        self.state.try_move(from, to)
    }

    pub(crate) fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl<K: Connector> fmt::Debug for ConnectionEntry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
