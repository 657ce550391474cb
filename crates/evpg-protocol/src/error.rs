//! Collaborator error types.

use std::sync::Arc;

use thiserror::Error;

/// Errors reported by a wire-protocol implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connection establishment could not be started.
    #[error("connection start failed: {0}")]
    ConnectStart(String),

    /// The query could not be dispatched.
    #[error("query dispatch rejected: {0}")]
    Send(String),

    /// Reading from the socket failed while awaiting a result.
    #[error("consume input failed: {0}")]
    Consume(String),

    /// A connection reset could not be started.
    #[error("connection reset failed: {0}")]
    Reset(String),

    /// A parameter set could not be represented on the wire.
    #[error("parameter encoding: {0}")]
    Param(#[from] evpg_types::ParamError),
}

/// Errors reported by an event-loop implementation.
///
/// Equality compares the I/O error kind, not the OS message.
#[derive(Debug, Error, Clone)]
pub enum ReactorError {
    /// Readiness interest could not be registered for a descriptor.
    #[error("readiness registration failed for {token}: {source}")]
    Register {
        /// Registration token.
        token: crate::Token,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The reactor has been shut down.
    #[error("reactor is shut down")]
    Closed,

    /// A wake handle could not be created.
    #[error("wake handle creation failed: {0}")]
    Waker(String),
}

impl ReactorError {
    /// Registration failure for `token`.
    #[must_use]
    pub fn register(token: crate::Token, source: std::io::Error) -> Self {
        Self::Register {
            token,
            source: Arc::new(source),
        }
    }
}

impl PartialEq for ReactorError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Register { token, source },
                Self::Register {
                    token: other_token,
                    source: other_source,
                },
            ) => token == other_token && source.kind() == other_source.kind(),
            (Self::Closed, Self::Closed) => true,
            (Self::Waker(a), Self::Waker(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ReactorError {}
