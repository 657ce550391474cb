//! Pending request queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use evpg_types::{Format, ParamSet};
use parking_lot::Mutex;

/// A query waiting for a connection. Owns copies of everything the caller
/// passed in, so the caller's buffers may be reused immediately.
pub(crate) struct PendingRequest<C> {
    pub(crate) query: String,
    pub(crate) params: ParamSet,
    pub(crate) result_format: Format,
    pub(crate) completion: C,
    enqueued_at: Instant,
}

impl<C> PendingRequest<C> {
    pub(crate) fn new(query: &str, params: &ParamSet, result_format: Format, completion: C) -> Self {
        Self {
            query: query.to_owned(),
            params: params.clone(),
            result_format,
            completion,
            enqueued_at: Instant::now(),
        }
    }

    pub(crate) fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

struct QueueState<C> {
    requests: VecDeque<PendingRequest<C>>,
    closed: bool,
}

/// FIFO of pending requests. The lock is only held to push or pop.
pub(crate) struct PendingQueue<C> {
    state: Mutex<QueueState<C>>,
}

impl<C> PendingQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Append a request and return the new depth. A closed queue hands the
    /// request back.
    pub(crate) fn push(&self, request: PendingRequest<C>) -> Result<usize, PendingRequest<C>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(request);
        }
        state.requests.push_back(request);
        Ok(state.requests.len())
    }

    pub(crate) fn pop(&self) -> Option<PendingRequest<C>> {
        self.state.lock().requests.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().requests.is_empty()
    }

    /// Refuse further pushes and take everything still queued, oldest first.
    pub(crate) fn close(&self) -> Vec<PendingRequest<C>> {
        let mut state = self.state.lock();
        state.closed = true;
        state.requests.drain(..).collect()
    }
}
