//! # evpg-testing
//!
//! Test infrastructure for the evpg connection pool.
//!
//! - [`MockConnector`] hands out scripted in-memory connections. Every
//!   connection it ever created stays observable through a [`MockControl`],
//!   including how many times it was finished.
//! - [`ManualReactor`] records readiness registrations and only runs
//!   callbacks when the test fires them, so every interleaving a test needs is
//!   reproducible.
//!
//! This crate deliberately does not depend on `evpg-pool`; the pool's own
//! integration tests depend on it instead.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_connection;
pub mod reactor;

pub use mock_connection::{MockConnection, MockConnector, MockControl, MockResult, SentQuery};
pub use reactor::ManualReactor;
