//! # evpg-pool
//!
//! Event-driven connection pool for PostgreSQL-style request/response
//! protocols.
//!
//! The pool never blocks and never owns an event loop. Connection
//! establishment, result readiness and idle promotion are driven by the
//! host's [`Reactor`]; the wire protocol is driven through a [`Connector`].
//!
//! ## Features
//!
//! - Lock-free ownership handoff through a per-connection atomic state machine
//! - Non-blocking `acquire` with low-water-mark growth
//! - FIFO queueing of requests submitted while every connection is busy
//! - Transaction-state validation on release, with session reset when needed
//! - Orderly shutdown that fails queued and in-flight requests exactly once
//! - A tokio-backed [`TokioReactor`] (feature `tokio`, Unix only)
//!
//! ## Example
//!
//! ```rust,ignore
//! use evpg_pool::{Format, ParamSet, Pool, PoolConfig, TokioReactor};
//!
//! let pool = Pool::new(
//!     PoolConfig::new("host=localhost dbname=app").min_connections(8),
//!     connector,
//!     TokioReactor::new()?,
//! )?;
//!
//! let mut params = ParamSet::new();
//! params.add("alice");
//!
//! let mut conn = pool
//!     .query("SELECT id FROM users WHERE name = $1", &params, Format::Binary)
//!     .await?;
//! for result in conn.results() {
//!     // ...
//! }
//! // Connection returned to the pool on drop.
//!
//! let status = pool.status();
//! println!("busy: {}, queued: {}", status.busy, status.pending);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod pool;
mod queue;
#[cfg(all(feature = "tokio", unix))]
pub mod tokio_reactor;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{
    Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection, QueryResult, Submission,
};

// Lifecycle
pub use lifecycle::{EntryId, EntryState};

#[cfg(all(feature = "tokio", unix))]
pub use tokio_reactor::TokioReactor;

// Collaborator interfaces and parameter types
pub use evpg_protocol::{
    Connection, ConnectionStatus, Connector, Descriptor, Interest, PollingStatus, ProtocolError,
    Reactor, ReactorError, Readiness, Token, TransactionStatus, Waker,
};
pub use evpg_types::{Format, IsNull, Oid, ParamError, ParamSet, ToParam};
