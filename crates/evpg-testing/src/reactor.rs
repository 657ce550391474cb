//! A reactor that only runs callbacks when told to.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use evpg_protocol::{
    Descriptor, Interest, Reactor, ReactorError, Readiness, ReadinessCallback, Token,
    WakeCallback, Waker,
};
use parking_lot::Mutex;

struct Slot {
    generation: u64,
    descriptor: Descriptor,
    interest: Interest,
    /// `None` while the callback is running.
    callback: Option<ReadinessCallback>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    slots: BTreeMap<Token, Slot>,
}

struct ManualWaker {
    pending: AtomicBool,
    wakes: AtomicUsize,
    callback: WakeCallback,
}

impl Waker for ManualWaker {
    fn wake(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
    }
}

/// A [`Reactor`] driven entirely by the test.
///
/// Registrations are recorded; [`fire`](ManualReactor::fire) runs one
/// callback, [`run_wakes`](ManualReactor::run_wakes) runs pending wake
/// callbacks. Nothing ever runs on its own, and callbacks are never run from
/// inside `register`, `unregister` or `wake`.
#[derive(Default)]
pub struct ManualReactor {
    registry: Mutex<Registry>,
    wakers: Mutex<Vec<Arc<ManualWaker>>>,
    registrations: AtomicUsize,
}

impl ManualReactor {
    /// Create an empty reactor.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tokens with an active registration, in ascending order.
    #[must_use]
    pub fn registered(&self) -> Vec<Token> {
        self.registry.lock().slots.keys().copied().collect()
    }

    /// Whether `token` has an active registration.
    #[must_use]
    pub fn is_registered(&self, token: Token) -> bool {
        self.registry.lock().slots.contains_key(&token)
    }

    /// Interest currently registered under `token`.
    #[must_use]
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.registry.lock().slots.get(&token).map(|slot| slot.interest)
    }

    /// Descriptor currently registered under `token`.
    #[must_use]
    pub fn descriptor(&self, token: Token) -> Option<Descriptor> {
        self.registry.lock().slots.get(&token).map(|slot| slot.descriptor)
    }

    /// Total number of `register` calls so far.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Report the registered interest as ready for `token`. Returns `false`
    /// if nothing is registered.
    pub fn fire(&self, token: Token) -> bool {
        let Some(interest) = self.interest(token) else {
            return false;
        };
        self.fire_with(token, Ok(Readiness::from(interest)))
    }

    /// Report a polling error for `token`.
    pub fn fail(&self, token: Token, error: io::Error) -> bool {
        self.fire_with(token, Err(error))
    }

    /// Run the callback registered under `token` with `event`.
    pub fn fire_with(&self, token: Token, event: io::Result<Readiness>) -> bool {
        let taken = {
            let mut registry = self.registry.lock();
            registry
                .slots
                .get_mut(&token)
                .and_then(|slot| slot.callback.take().map(|cb| (slot.generation, cb)))
        };
        let Some((generation, mut callback)) = taken else {
            return false;
        };

        callback(event);

        // Put the callback back unless it replaced or removed its own
        // registration while running.
        let mut registry = self.registry.lock();
        if let Some(slot) = registry.slots.get_mut(&token) {
            if slot.generation == generation && slot.callback.is_none() {
                slot.callback = Some(callback);
            }
        }
        true
    }

    /// Fire every registered token once, in token order. Returns how many
    /// callbacks ran.
    pub fn fire_all(&self) -> usize {
        self.registered()
            .into_iter()
            .filter(|token| self.fire(*token))
            .count()
    }

    /// Number of wake handles with a wake pending.
    #[must_use]
    pub fn pending_wakes(&self) -> usize {
        self.wakers
            .lock()
            .iter()
            .filter(|w| w.pending.load(Ordering::SeqCst))
            .count()
    }

    /// Total number of `wake` calls across all handles.
    #[must_use]
    pub fn wake_calls(&self) -> usize {
        self.wakers
            .lock()
            .iter()
            .map(|w| w.wakes.load(Ordering::SeqCst))
            .sum()
    }

    /// Run the callback of every handle with a wake pending, once each.
    /// Returns how many callbacks ran.
    pub fn run_wakes(&self) -> usize {
        let wakers: Vec<_> = self.wakers.lock().clone();
        let mut ran = 0;
        for waker in wakers {
            if waker.pending.swap(false, Ordering::SeqCst) {
                (waker.callback)();
                ran += 1;
            }
        }
        ran
    }

    /// Alternate wakes and readiness until nothing is left to run, or
    /// `max_rounds` rounds passed. Returns the number of rounds that did
    /// any work.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut rounds = 0;
        while rounds < max_rounds {
            let ran = self.run_wakes() + self.fire_all();
            if ran == 0 {
                break;
            }
            rounds += 1;
        }
        rounds
    }
}

impl Reactor for ManualReactor {
    fn register(
        &self,
        token: Token,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadinessCallback,
    ) -> Result<(), ReactorError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.registry.lock();
        registry.next_generation += 1;
        let generation = registry.next_generation;
        registry.slots.insert(
            token,
            Slot {
                generation,
                descriptor,
                interest,
                callback: Some(callback),
            },
        );
        Ok(())
    }

    fn unregister(&self, token: Token) {
        self.registry.lock().slots.remove(&token);
    }

    fn waker(&self, callback: WakeCallback) -> Result<Arc<dyn Waker>, ReactorError> {
        let waker = Arc::new(ManualWaker {
            pending: AtomicBool::new(false),
            wakes: AtomicUsize::new(0),
            callback,
        });
        self.wakers.lock().push(Arc::clone(&waker));
        Ok(waker)
    }
}

impl std::fmt::Debug for ManualReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualReactor")
            .field("registered", &self.registered())
            .field("pending_wakes", &self.pending_wakes())
            .finish()
    }
}
