//! # evpg-protocol
//!
//! Capability interfaces the evpg pool consumes from its two external
//! collaborators.
//!
//! The pool never speaks the database wire protocol itself and never owns an
//! event loop. Instead it drives:
//!
//! - a [`Connector`]/[`Connection`] pair: non-blocking connection
//!   establishment, query dispatch and result readiness checks, in the shape
//!   of libpq's asynchronous API (`PQconnectStart`, `PQconnectPoll`,
//!   `PQsendQueryParams`, `PQconsumeInput`, `PQisBusy`, ...);
//! - a [`Reactor`]: readiness registration for connection sockets and a
//!   coalesced cross-thread [`Waker`].
//!
//! Both are plain traits so a host process can plug in its own driver and
//! loop, and tests can plug in scripted doubles.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod reactor;

pub use connection::{
    Connection, ConnectionStatus, Connector, PollingStatus, TransactionStatus,
};
pub use error::{ProtocolError, ReactorError};
pub use reactor::{
    Descriptor, Interest, RawDescriptor, Reactor, Readiness, ReadinessCallback, Token,
    WakeCallback, Waker,
};
