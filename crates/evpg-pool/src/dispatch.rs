//! Reactor-driven progress: connection establishment, query dispatch, result
//! readiness, release validation and queue draining.
//!
//! Everything here runs either on the calling thread (without blocking) or
//! inside a reactor callback. Protocol calls are made while holding only the
//! entry's handle lock, and user handlers are always called with no lock held.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use evpg_protocol::{
    Connection, ConnectionStatus, Connector, Interest, PollingStatus, ReactorError, Readiness,
    ReadinessCallback,
};
use evpg_types::{Format, ParamSet};

use crate::error::PoolError;
use crate::lifecycle::{ConnectionEntry, EntryId, EntryState};
use crate::pool::{Completion, PoolInner, PooledConnection, ReleaseMode, Submission};
use crate::queue::PendingRequest;

enum ConnectStep {
    Waiting,
    Ready,
    Failed(String),
}

enum ResultStep {
    Pending,
    Ready,
    Failed(PoolError),
}

enum Verdict {
    Idle,
    Reconnect,
    Discard,
}

type Rejected<K> = (PoolError, Completion<K>);

impl<K: Connector> PoolInner<K> {
    pub(crate) fn submit(
        self: &Arc<Self>,
        query: &str,
        params: &ParamSet,
        result_format: Format,
        completion: Completion<K>,
    ) -> Result<Submission, PoolError> {
        if self.is_closed() {
            return Err(PoolError::ShutdownInProgress);
        }

        if let Some(entry) = self.acquire_entry(true) {
            return match self.dispatch(&entry, query, params, result_format, completion) {
                Ok(()) => Ok(Submission::Dispatched(entry.id())),
                Err((err, _)) => Err(err),
            };
        }

        let request = PendingRequest::new(query, params, result_format, completion);
        match self.pending.push(request) {
            Ok(depth) => {
                self.record(|m| m.queries_queued += 1);
                tracing::debug!(depth, "no connection available, request queued");
                // A connection may have become available between the failed
                // acquire and the push.
                self.drain_queue();
                Ok(Submission::Queued { depth })
            }
            Err(_) => Err(PoolError::ShutdownInProgress),
        }
    }

    /// Drive establishment (or reset) of a `Connecting` entry by one step.
    pub(crate) fn advance_connect(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>) {
        let step = {
            let mut guard = entry.conn.lock();
            if entry.state() != EntryState::Connecting {
                return;
            }
            let Some(conn) = guard.as_mut() else {
                return;
            };
            match conn.poll_connect() {
                PollingStatus::Reading => self.watch_connect(entry, conn, Interest::Read),
                PollingStatus::Writing => self.watch_connect(entry, conn, Interest::Write),
                PollingStatus::Ok => {
                    self.reactor.unregister(entry.token());
                    ConnectStep::Ready
                }
                PollingStatus::Failed => ConnectStep::Failed(conn.error_message()),
            }
        };

        match step {
            ConnectStep::Waiting => {}
            ConnectStep::Ready => self.connection_ready(entry),
            ConnectStep::Failed(message) => self.connection_failed(entry, &message),
        }
    }

    fn watch_connect(
        self: &Arc<Self>,
        entry: &Arc<ConnectionEntry<K>>,
        conn: &K::Connection,
        interest: Interest,
    ) -> ConnectStep {
        let Some(socket) = conn.socket() else {
            return ConnectStep::Failed("connection has no socket".into());
        };

        let pool = Arc::downgrade(self);
        let target = Arc::clone(entry);
        let callback: ReadinessCallback = Box::new(move |event: io::Result<Readiness>| {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            match event {
                Ok(_) => pool.advance_connect(&target),
                Err(err) => pool.connection_failed(&target, &err.to_string()),
            }
        });

        match self.reactor.register(entry.token(), socket, interest, callback) {
            Ok(()) => {
                tracing::trace!(connection = %entry.id(), ?interest, "awaiting connection progress");
                ConnectStep::Waiting
            }
            Err(err) => ConnectStep::Failed(err.to_string()),
        }
    }

    fn connection_ready(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>) {
        if !entry.try_move(EntryState::Connecting, EntryState::Available) {
            return;
        }
        tracing::debug!(connection = %entry.id(), "connection ready");

        if self.is_closed() {
            self.disconnect_entry(entry, PoolError::ShutdownInProgress);
            return;
        }
        self.drain_queue();
    }

    pub(crate) fn connection_failed(&self, entry: &ConnectionEntry<K>, message: &str) {
        if entry.try_move(EntryState::Connecting, EntryState::Disconnecting) {
            tracing::warn!(connection = %entry.id(), error = message, "connection establishment failed");
            self.record(|m| m.establishment_failures += 1);
            self.finish_entry(entry, PoolError::EstablishmentFailed(message.to_owned()));
        }
    }

    /// Send a query on a `Busy` entry and arm result readiness. On failure
    /// the entry is released and the completion handed back uncalled.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        entry: &Arc<ConnectionEntry<K>>,
        query: &str,
        params: &ParamSet,
        result_format: Format,
        completion: Completion<K>,
    ) -> Result<(), Rejected<K>> {
        let sent = {
            let mut guard = entry.conn.lock();
            match guard.as_mut() {
                Some(conn) => conn
                    .send_query(query, params, result_format)
                    .map_err(|err| PoolError::SendFailed(err.to_string())),
                None => Err(self.disconnect_reason()),
            }
        };

        if let Err(err) = sent {
            tracing::warn!(connection = %entry.id(), error = %err, "query dispatch failed");
            self.record(|m| m.queries_failed += 1);
            self.release_entry(entry, ReleaseMode::Validate);
            return Err((err, completion));
        }

        *entry.in_flight.lock() = Some(completion);
        if entry.state() != EntryState::Busy {
            // Disconnected concurrently; whoever finished the entry may have
            // missed the completion.
            let missed = entry.in_flight.lock().take();
            if let Some(completion) = missed {
                self.record(|m| m.queries_failed += 1);
                completion(Err(self.disconnect_reason()));
            }
            return Ok(());
        }

        self.record(|m| m.queries_dispatched += 1);
        tracing::trace!(connection = %entry.id(), "query dispatched");
        self.watch_result(entry);
        Ok(())
    }

    fn watch_result(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>) {
        let registered = {
            let guard = entry.conn.lock();
            match guard.as_ref().and_then(|conn| conn.socket()) {
                Some(socket) => {
                    let pool = Arc::downgrade(self);
                    let target = Arc::clone(entry);
                    let callback: ReadinessCallback =
                        Box::new(move |event: io::Result<Readiness>| {
                            if let Some(pool) = pool.upgrade() {
                                pool.on_result_ready(&target, event);
                            }
                        });
                    self.reactor
                        .register(entry.token(), socket, Interest::Read, callback)
                        .map_err(PoolError::from)
                }
                None => Err(self.disconnect_reason()),
            }
        };

        if let Err(err) = registered {
            tracing::warn!(connection = %entry.id(), error = %err, "cannot watch for query result");
            let completion = entry.in_flight.lock().take();
            self.release_entry(entry, ReleaseMode::Reset);
            if let Some(completion) = completion {
                self.record(|m| m.queries_failed += 1);
                completion(Err(err));
            }
        }
    }

    fn on_result_ready(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>, event: io::Result<Readiness>) {
        let step = {
            let mut guard = entry.conn.lock();
            if entry.state() != EntryState::Busy {
                return;
            }
            let Some(conn) = guard.as_mut() else {
                return;
            };
            let consumed = match event {
                Ok(_) => conn
                    .consume_input()
                    .map_err(|err| PoolError::ConsumeFailed(err.to_string())),
                Err(err) => Err(ReactorError::register(entry.token(), err).into()),
            };
            match consumed {
                Err(err) => {
                    self.reactor.unregister(entry.token());
                    ResultStep::Failed(err)
                }
                Ok(()) if conn.is_busy() => ResultStep::Pending,
                Ok(()) => {
                    self.reactor.unregister(entry.token());
                    ResultStep::Ready
                }
            }
        };

        match step {
            ResultStep::Pending => {
                tracing::trace!(connection = %entry.id(), "query result incomplete");
            }
            ResultStep::Ready => {
                let Some(completion) = entry.in_flight.lock().take() else {
                    return;
                };
                tracing::trace!(connection = %entry.id(), "query result ready");
                completion(Ok(PooledConnection::new(Arc::clone(self), Arc::clone(entry))));
            }
            ResultStep::Failed(err) => {
                tracing::warn!(connection = %entry.id(), error = %err, "reading query result failed");
                let completion = entry.in_flight.lock().take();
                self.release_entry(entry, ReleaseMode::Reset);
                if let Some(completion) = completion {
                    self.record(|m| m.queries_failed += 1);
                    completion(Err(err));
                }
            }
        }
    }

    /// Return a `Busy` entry. Only the caller that wins `Busy -> Validating`
    /// does anything; later calls for the same checkout are no-ops.
    pub(crate) fn release_entry(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>, mode: ReleaseMode) {
        if !entry.try_move(EntryState::Busy, EntryState::Validating) {
            return;
        }
        let abandoned = entry.in_flight.lock().take();

        let verdict = {
            let mut guard = entry.conn.lock();
            self.reactor.unregister(entry.token());
            match guard.as_mut() {
                None => Verdict::Discard,
                Some(_) if self.is_closed() => Verdict::Discard,
                Some(conn) => self.validate(entry.id(), conn, mode),
            }
        };

        match verdict {
            Verdict::Idle => {
                entry.try_move(EntryState::Validating, EntryState::IdleReady);
                tracing::trace!(connection = %entry.id(), "connection released");
                self.wake();
            }
            Verdict::Reconnect => {
                if entry.try_move(EntryState::Validating, EntryState::Connecting) {
                    self.record(|m| m.resets_performed += 1);
                    self.advance_connect(entry);
                }
            }
            Verdict::Discard => {
                if entry.try_move(EntryState::Validating, EntryState::Disconnecting) {
                    self.finish_entry(entry, self.disconnect_reason());
                }
            }
        }

        if let Some(completion) = abandoned {
            tracing::debug!(connection = %entry.id(), "connection released with a query in flight");
            self.record(|m| m.queries_failed += 1);
            completion(Err(self.disconnect_reason()));
        }
    }

    fn validate(&self, id: EntryId, conn: &mut K::Connection, mode: ReleaseMode) -> Verdict {
        let busy = conn.is_busy();
        if !busy {
            let mut discarded = 0usize;
            while conn.next_result().is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                tracing::trace!(connection = %id, discarded, "discarded unread results");
            }
        }

        let transaction = conn.transaction_status();
        let healthy = conn.status() == ConnectionStatus::Ok;
        if mode == ReleaseMode::Validate && !busy && healthy && transaction.is_reusable() {
            return Verdict::Idle;
        }

        tracing::debug!(connection = %id, ?transaction, busy, healthy, "resetting connection");
        match conn.reset_start() {
            Ok(()) => Verdict::Reconnect,
            Err(err) => {
                tracing::warn!(connection = %id, error = %err, "connection reset failed");
                self.record(|m| m.resets_failed += 1);
                Verdict::Discard
            }
        }
    }

    fn disconnect_reason(&self) -> PoolError {
        if self.is_closed() {
            PoolError::ShutdownInProgress
        } else {
            PoolError::Disconnected
        }
    }

    /// Wake callback: promote every `IdleReady` entry, then serve the queue.
    pub(crate) fn promote_idle(self: &Arc<Self>) {
        let promoted: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.try_move(EntryState::IdleReady, EntryState::Available))
            .collect();
        tracing::trace!(promoted = promoted.len(), "idle connections promoted");

        if self.is_closed() {
            for entry in &promoted {
                self.disconnect_entry(entry, PoolError::ShutdownInProgress);
            }
            return;
        }
        self.drain_queue();
    }

    /// Dispatch queued requests while connections are available.
    ///
    /// Never blocks: if another thread (or an outer frame of this one) is
    /// already draining, the request is left to it.
    pub(crate) fn drain_queue(self: &Arc<Self>) {
        self.drain_requested.store(true, Ordering::SeqCst);
        while self.drain_requested.load(Ordering::SeqCst) {
            let Some(guard) = self.drain_lock.try_lock() else {
                return;
            };
            let mut rejected = Vec::new();
            while self.drain_requested.swap(false, Ordering::SeqCst) {
                self.drain_pass(&mut rejected);
            }
            drop(guard);

            for (err, completion) in rejected {
                completion(Err(err));
            }
        }
    }

    fn drain_pass(self: &Arc<Self>, rejected: &mut Vec<Rejected<K>>) {
        loop {
            if self.is_closed() || self.pending.is_empty() {
                return;
            }
            // Running out of connections here is not a failed checkout.
            let Some(entry) = self.take_entry(false) else {
                return;
            };
            let Some(request) = self.pending.pop() else {
                self.release_entry(&entry, ReleaseMode::Validate);
                return;
            };
            self.record(|m| m.checkouts_successful += 1);

            let waited = request.waited();
            self.record(|m| m.queue_wait_total += waited);
            tracing::trace!(
                connection = %entry.id(),
                waited_us = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX),
                "dispatching queued request"
            );

            if let Err(failure) = self.dispatch(
                &entry,
                &request.query,
                &request.params,
                request.result_format,
                request.completion,
            ) {
                rejected.push(failure);
            }
        }
    }
}
