//! Pool error types.

use evpg_protocol::ReactorError;
use thiserror::Error;

use crate::lifecycle::EntryState;

/// Errors surfaced by the connection pool.
///
/// Connection-level failures are handled inside the pool; these values only
/// reach callers for request-level outcomes and caller mistakes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// A connection could not be established.
    #[error("connection establishment failed: {0}")]
    EstablishmentFailed(String),

    /// Reading from the connection failed while awaiting a result.
    #[error("failed to read query result: {0}")]
    ConsumeFailed(String),

    /// The protocol layer rejected the query.
    #[error("query dispatch rejected: {0}")]
    SendFailed(String),

    /// The pool is shutting down or already shut down.
    #[error("connection pool is shutting down")]
    ShutdownInProgress,

    /// The connection was closed or released before the query completed.
    #[error("connection closed before the query completed")]
    Disconnected,

    /// A state change that the entry state machine does not allow.
    #[error("illegal connection state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// State the transition started from.
        from: EntryState,
        /// Requested target state.
        to: EntryState,
    },

    /// Invalid pool configuration.
    #[error("pool configuration error: {0}")]
    Config(String),

    /// The reactor refused a registration.
    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),
}

impl PoolError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EstablishmentFailed(_) | Self::ConsumeFailed(_) | Self::Disconnected
        )
    }
}
