//! Event-loop capability interface.

use std::fmt;
use std::sync::Arc;

use crate::error::ReactorError;

/// Platform socket handle type.
#[cfg(unix)]
pub type RawDescriptor = std::os::fd::RawFd;
/// Platform socket handle type.
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;
/// Platform socket handle type.
#[cfg(not(any(unix, windows)))]
pub type RawDescriptor = i32;

/// A socket descriptor reported by a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub RawDescriptor);

impl Descriptor {
    /// Get the raw platform handle.
    #[must_use]
    pub fn raw(self) -> RawDescriptor {
        self.0
    }
}

/// Identifies one readiness registration; the pool uses one token per
/// connection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Readiness the caller wants to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Socket readable.
    Read,
    /// Socket writable.
    Write,
}

bitflags::bitflags! {
    /// Readiness reported to a callback.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u8 {
        /// Socket is readable.
        const READABLE = 0b01;
        /// Socket is writable.
        const WRITABLE = 0b10;
    }
}

impl Readiness {
    /// Whether this readiness satisfies `interest`.
    #[must_use]
    pub fn satisfies(self, interest: Interest) -> bool {
        match interest {
            Interest::Read => self.contains(Self::READABLE),
            Interest::Write => self.contains(Self::WRITABLE),
        }
    }
}

impl From<Interest> for Readiness {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => Self::READABLE,
            Interest::Write => Self::WRITABLE,
        }
    }
}

/// Callback invoked on the loop when a registered socket becomes ready, or
/// when polling it failed.
pub type ReadinessCallback = Box<dyn FnMut(std::io::Result<Readiness>) + Send>;

/// Callback invoked on the loop after one or more [`Waker::wake`] calls.
pub type WakeCallback = Box<dyn Fn() + Send + Sync>;

/// A coalesced cross-thread wake signal.
///
/// Any number of `wake` calls made before the loop gets to run the callback
/// result in a single callback invocation.
pub trait Waker: Send + Sync {
    /// Schedule the wake callback. Never blocks and never runs the callback
    /// on the calling thread.
    fn wake(&self);
}

/// An event loop that delivers socket readiness.
///
/// Implementations must deliver callbacks from the loop only, never from
/// inside [`register`](Reactor::register), [`unregister`](Reactor::unregister)
/// or [`Waker::wake`]. Callers may therefore hold their own locks across those
/// calls.
pub trait Reactor: Send + Sync {
    /// Start watching `descriptor` for `interest`, replacing any registration
    /// already held under `token`. The callback fires every time the
    /// interest is satisfied until the registration is replaced or removed.
    fn register(
        &self,
        token: Token,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadinessCallback,
    ) -> Result<(), ReactorError>;

    /// Stop watching under `token`. Unknown tokens are ignored.
    fn unregister(&self, token: Token);

    /// Create a coalesced wake handle bound to `callback`.
    fn waker(&self, callback: WakeCallback) -> Result<Arc<dyn Waker>, ReactorError>;
}
