//! [`Reactor`] implementation on top of a tokio runtime.
//!
//! Each token gets one watcher task that owns the `AsyncFd` for whatever
//! descriptor is currently registered under it. Registration changes are sent
//! to that task over a channel, so they never block and callbacks only ever
//! run inside the task.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use evpg_protocol::{
    Descriptor, Interest, Reactor, ReactorError, Readiness, ReadinessCallback, Token,
    WakeCallback, Waker,
};
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

enum Command {
    Watch {
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadinessCallback,
    },
    Clear,
}

/// A reactor driven by tokio's I/O driver.
///
/// Requires a runtime with I/O enabled. Callbacks run on runtime worker
/// threads.
pub struct TokioReactor {
    handle: Handle,
    watchers: Mutex<HashMap<Token, mpsc::UnboundedSender<Command>>>,
}

impl TokioReactor {
    /// Create a reactor on the current runtime.
    pub fn new() -> Result<Arc<Self>, ReactorError> {
        let handle = Handle::try_current().map_err(|_| ReactorError::Closed)?;
        Ok(Self::with_handle(handle))
    }

    /// Create a reactor on the runtime behind `handle`.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            watchers: Mutex::new(HashMap::new()),
        })
    }

    /// Number of tokens that have a watcher task.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }
}

impl Reactor for TokioReactor {
    fn register(
        &self,
        token: Token,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadinessCallback,
    ) -> Result<(), ReactorError> {
        let mut watchers = self.watchers.lock();
        let mut command = Command::Watch {
            descriptor,
            interest,
            callback,
        };

        if let Some(tx) = watchers.get(&token) {
            match tx.send(command) {
                Ok(()) => return Ok(()),
                // The watcher task is gone; start a new one.
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(command).is_err() {
            return Err(ReactorError::Closed);
        }
        self.handle.spawn(watch(token, rx));
        watchers.insert(token, tx);
        tracing::trace!(%token, "watcher started");
        Ok(())
    }

    fn unregister(&self, token: Token) {
        if let Some(tx) = self.watchers.lock().get(&token) {
            let _ = tx.send(Command::Clear);
        }
    }

    fn waker(&self, callback: WakeCallback) -> Result<Arc<dyn Waker>, ReactorError> {
        // Capacity one: wakes sent while one is already pending coalesce.
        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.handle.spawn(async move {
            while rx.recv().await.is_some() {
                callback();
            }
        });
        Ok(Arc::new(ChannelWaker { tx }))
    }
}

impl std::fmt::Debug for TokioReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioReactor")
            .field("watchers", &self.watcher_count())
            .finish_non_exhaustive()
    }
}

struct ChannelWaker {
    tx: mpsc::Sender<()>,
}

impl Waker for ChannelWaker {
    fn wake(&self) {
        // Full means a wake is already pending; closed means the loop is gone.
        let _ = self.tx.try_send(());
    }
}

/// Wait for `interest` and clear it before the callback runs, so an edge
/// arriving while the callback runs is not lost.
async fn wait_ready(fd: &AsyncFd<RawFd>, interest: Interest) -> io::Result<Readiness> {
    let (mut guard, readiness) = match interest {
        Interest::Read => (fd.readable().await?, Readiness::READABLE),
        Interest::Write => (fd.writable().await?, Readiness::WRITABLE),
    };
    guard.clear_ready();
    Ok(readiness)
}

async fn watch(token: Token, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut fd: Option<AsyncFd<RawFd>> = None;
    let mut interest = Interest::Read;
    let mut callback: Option<ReadinessCallback> = None;

    loop {
        // Only plain data may be borrowed across the readiness await: the
        // callback slot is not `Sync`.
        let armed = callback.is_some();
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                None => break,
                Some(Command::Clear) => {
                    callback = None;
                    fd = None;
                }
                Some(Command::Watch { descriptor, interest: next, callback: mut next_callback }) => {
                    let same = fd.as_ref().is_some_and(|fd| *fd.get_ref() == descriptor.raw());
                    if !same {
                        fd = None;
                        match AsyncFd::new(descriptor.raw()) {
                            Ok(watched) => fd = Some(watched),
                            Err(err) => {
                                tracing::warn!(%token, error = %err, "cannot watch descriptor");
                                callback = None;
                                next_callback(Err(err));
                                continue;
                            }
                        }
                    }
                    interest = next;
                    callback = Some(next_callback);
                }
            },

            ready = async {
                match (fd.as_ref(), armed) {
                    (Some(fd), true) => wait_ready(fd, interest).await,
                    _ => std::future::pending().await,
                }
            } => {
                let Some(notify) = callback.as_mut() else {
                    continue;
                };
                match ready {
                    Ok(readiness) => notify(Ok(readiness)),
                    Err(err) => {
                        notify(Err(err));
                        callback = None;
                        fd = None;
                    }
                }
            }
        }
    }
    tracing::trace!(%token, "watcher stopped");
}
