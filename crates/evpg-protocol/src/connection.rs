//! Wire-protocol capability interface.
//!
//! ## Establishment
//!
//! ```text
//! start_connect() -> poll_connect() == Reading  -> wait readable -> poll_connect() ...
//!                                   == Writing  -> wait writable -> poll_connect() ...
//!                                   == Ok       -> ready for queries
//!                                   == Failed   -> finish()
//! ```
//!
//! ## Query
//!
//! ```text
//! send_query() -> wait readable -> consume_input() -> is_busy()? -> wait readable ...
//!                                                  -> !is_busy() -> next_result() until None
//! ```
//!
//! None of these calls may block on network I/O.

use evpg_types::{Format, ParamSet};

use crate::error::ProtocolError;
use crate::reactor::Descriptor;

/// Result of one non-blocking establishment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    /// Wait for the socket to become readable, then poll again.
    Reading,
    /// Wait for the socket to become writable, then poll again.
    Writing,
    /// Establishment failed; the connection is unusable.
    Failed,
    /// Establishment completed; the connection is ready for queries.
    Ok,
}

/// Coarse health of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The handle is usable, or still establishing.
    Ok,
    /// The handle is broken and must be finished.
    Bad,
}

/// Server-side transaction state of an idle connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not inside a transaction block.
    Idle,
    /// A command is in progress.
    Active,
    /// Inside a valid transaction block.
    InTransaction,
    /// Inside a failed transaction block.
    InError,
    /// The state cannot be determined (bad connection).
    Unknown,
}

impl TransactionStatus {
    /// Whether a connection in this state may be handed to another caller
    /// without a reset.
    #[must_use]
    pub fn is_reusable(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Starts new non-blocking connections.
pub trait Connector: Send + Sync + 'static {
    /// The connection handle type.
    type Connection: Connection;

    /// Begin establishing a connection without blocking.
    ///
    /// The returned handle is driven to completion with
    /// [`Connection::poll_connect`].
    fn start_connect(&self, conninfo: &str) -> Result<Self::Connection, ProtocolError>;
}

/// One protocol connection handle.
///
/// The pool guarantees that it calls these methods from one actor at a time
/// per handle, and that [`finish`](Connection::finish) is called exactly once
/// per handle.
pub trait Connection: Send + 'static {
    /// One complete query result.
    type Output: Send + 'static;

    /// Current health of the handle.
    fn status(&self) -> ConnectionStatus;

    /// Advance establishment (or a reset) by one non-blocking step.
    fn poll_connect(&mut self) -> PollingStatus;

    /// Socket to watch for readiness, if one is open.
    fn socket(&self) -> Option<Descriptor>;

    /// Dispatch a parameterised query without waiting for its result.
    fn send_query(
        &mut self,
        query: &str,
        params: &ParamSet,
        result_format: Format,
    ) -> Result<(), ProtocolError>;

    /// Read whatever input is available on the socket.
    fn consume_input(&mut self) -> Result<(), ProtocolError>;

    /// Whether a result is still incomplete. A `false` answer means
    /// [`next_result`](Connection::next_result) will not block.
    fn is_busy(&self) -> bool;

    /// Take the next complete result, `None` once all have been read.
    fn next_result(&mut self) -> Option<Self::Output>;

    /// Server-side transaction state.
    fn transaction_status(&self) -> TransactionStatus;

    /// Begin re-establishing this connection without blocking. Progress is
    /// then driven with [`poll_connect`](Connection::poll_connect).
    fn reset_start(&mut self) -> Result<(), ProtocolError>;

    /// Most recent error message reported by the handle.
    fn error_message(&self) -> String;

    /// Close the connection and release the handle.
    fn finish(self);
}
