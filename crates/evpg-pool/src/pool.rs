//! Connection pool implementation.
//!
//! The pool owns an inventory of connection entries, grows it on demand and
//! hands connections out without ever blocking the calling thread. All
//! socket progress (establishment, result readiness, idle promotion) happens
//! on the host's [`Reactor`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use evpg_protocol::{Connection, ConnectionStatus, Connector, Reactor, TransactionStatus, Waker};
use evpg_types::{Format, ParamSet};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionEntry, EntryId, EntryState};
use crate::queue::PendingQueue;

/// Outcome delivered to a query handler: the connection holding the result,
/// or the reason the query could not complete.
pub type QueryResult<K> = Result<PooledConnection<K>, PoolError>;

pub(crate) type Completion<K> = Box<dyn FnOnce(QueryResult<K>) + Send>;

/// How an accepted [`Pool::submit_query`] call was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Sent immediately on the given connection.
    Dispatched(EntryId),
    /// No connection was free; the request waits at this queue depth.
    Queued {
        /// Queue length right after the request was appended.
        depth: usize,
    },
}

/// How a busy connection is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseMode {
    /// Reuse the session as-is if its transaction state allows it.
    Validate,
    /// Always reset the session before reuse.
    Reset,
}

/// An event-driven connection pool.
///
/// The pool is cheap to clone; clones share the same inventory. Dropping the
/// last clone shuts the pool down.
///
/// # Example
///
/// ```rust,ignore
/// use evpg_pool::{Format, ParamSet, Pool, PoolConfig};
///
/// let pool = Pool::builder()
///     .pool_config(PoolConfig::new("host=localhost dbname=app"))
///     .connector(connector)
///     .reactor(reactor)
///     .build()?;
///
/// let mut params = ParamSet::new();
/// params.add(42_i32);
/// pool.submit_query("SELECT $1::int4", &params, Format::Text, (), |(), result| {
///     match result {
///         Ok(mut conn) => {
///             while let Some(res) = conn.next_result() {
///                 // ...
///             }
///         }
///         Err(err) => tracing::warn!(%err, "query failed"),
///     }
/// })?;
/// ```
pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

pub(crate) struct PoolInner<K: Connector> {
    pub(crate) config: PoolConfig,
    pub(crate) connector: K,
    pub(crate) reactor: Arc<dyn Reactor>,

    /// Set once right after construction.
    waker: OnceCell<Arc<dyn Waker>>,

    entries: RwLock<Vec<Arc<ConnectionEntry<K>>>>,
    pub(crate) pending: PendingQueue<Completion<K>>,

    closed: AtomicBool,
    growing: AtomicBool,

    pub(crate) drain_lock: Mutex<()>,
    pub(crate) drain_requested: AtomicBool,

    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    /// Handles returned by the connector.
    pub(crate) connections_created: u64,
    /// Handles finished.
    pub(crate) connections_closed: u64,
    /// Connections that failed to start or to finish the handshake.
    pub(crate) establishment_failures: u64,
    /// Successful acquisitions.
    pub(crate) checkouts_successful: u64,
    /// Acquisitions that found nothing available.
    pub(crate) checkouts_failed: u64,
    /// Queries handed to the protocol layer.
    pub(crate) queries_dispatched: u64,
    /// Queries that had to wait for a connection.
    pub(crate) queries_queued: u64,
    /// Queries whose handler received an error.
    pub(crate) queries_failed: u64,
    /// Resets started.
    pub(crate) resets_performed: u64,
    /// Resets that could not be started.
    pub(crate) resets_failed: u64,
    /// Sum of time spent in the pending queue.
    pub(crate) queue_wait_total: Duration,
}

impl<K: Connector> Pool<K> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder<K> {
        PoolBuilder::new()
    }

    /// Create a pool and start opening `min_connections` connections.
    ///
    /// Returns before any connection is established; establishment proceeds
    /// on the reactor.
    pub fn new(
        config: PoolConfig,
        connector: K,
        reactor: Arc<dyn Reactor>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config,
            connector,
            reactor,
            waker: OnceCell::new(),
            entries: RwLock::new(Vec::new()),
            pending: PendingQueue::new(),
            closed: AtomicBool::new(false),
            growing: AtomicBool::new(false),
            drain_lock: Mutex::new(()),
            drain_requested: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        let weak = Arc::downgrade(&inner);
        let waker = inner.reactor.waker(Box::new(move || {
            if let Some(pool) = weak.upgrade() {
                pool.promote_idle();
            }
        }))?;
        if inner.waker.set(waker).is_err() {
            tracing::error!("pool waker initialized twice");
        }

        tracing::info!(
            min = inner.config.min_connections,
            min_free = inner.config.min_free_connections,
            max_free = inner.config.max_free_connections,
            max = ?inner.config.max_connections,
            "connection pool created"
        );

        inner.open_connections(inner.config.min_connections);

        Ok(Self { inner })
    }

    /// Run `query` on the next free connection and call `handler` with its
    /// outcome.
    ///
    /// Never blocks. If a connection is available the query is sent right
    /// away; otherwise it is queued and dispatched in submission order as
    /// connections free up. The query text and parameters are copied, so the
    /// caller may reuse them as soon as this returns.
    ///
    /// An `Ok` return means `handler` will be called exactly once, on the
    /// reactor, with `context` and the result. An `Err` return means the
    /// request was not accepted and `handler` is dropped without being
    /// called.
    pub fn submit_query<T, F>(
        &self,
        query: &str,
        params: &ParamSet,
        result_format: Format,
        context: T,
        handler: F,
    ) -> Result<Submission, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(T, QueryResult<K>) + Send + 'static,
    {
        let completion: Completion<K> = Box::new(move |result| handler(context, result));
        self.inner.submit(query, params, result_format, completion)
    }

    /// Submit `query` and wait for its result.
    #[cfg(feature = "tokio")]
    pub async fn query(
        &self,
        query: &str,
        params: &ParamSet,
        result_format: Format,
    ) -> QueryResult<K> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.submit_query(query, params, result_format, tx, |tx, result| {
            // A dropped receiver returns the connection to the pool.
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| PoolError::ShutdownInProgress)?
    }

    /// Take an available connection without waiting.
    ///
    /// Returns `None` when nothing is available or the pool is shut down.
    /// With `grow_if_low`, a successful or failed attempt that leaves fewer
    /// than `min_free_connections` free connections starts new ones.
    #[must_use]
    pub fn acquire(&self, grow_if_low: bool) -> Option<PooledConnection<K>> {
        self.inner
            .acquire_entry(grow_if_low)
            .map(|entry| PooledConnection::new(Arc::clone(&self.inner), entry))
    }

    /// Return a connection. Equivalent to [`PooledConnection::release`].
    pub fn release(&self, conn: PooledConnection<K>) {
        conn.release();
    }

    /// Shut the pool down.
    ///
    /// Fails every queued request with [`PoolError::ShutdownInProgress`],
    /// fails in-flight queries the same way and closes every connection.
    /// Returns once every entry is `Invalid`. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            establishment_failures: inner.establishment_failures,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            queries_dispatched: inner.queries_dispatched,
            queries_queued: inner.queries_queued,
            queries_failed: inner.queries_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            queue_wait_total: inner.queue_wait_total,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Check if the pool is shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of requests waiting for a connection.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// State of one inventory entry.
    #[must_use]
    pub fn entry_state(&self, id: EntryId) -> Option<EntryState> {
        self.inner.entries.read().get(id.0).map(|entry| entry.state())
    }

    /// Force a connection closed, for example when a query it is running
    /// has passed the caller's deadline.
    ///
    /// A query in flight on it fails with [`PoolError::Disconnected`].
    /// Returns `false` if the slot is empty, unknown, or mid-validation on
    /// another thread.
    pub fn disconnect(&self, id: EntryId) -> bool {
        let entry = self.inner.entries.read().get(id.0).cloned();
        match entry {
            Some(entry) => self.inner.disconnect_entry(&entry, PoolError::Disconnected),
            None => false,
        }
    }
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> fmt::Debug for Pool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<K: Connector> PoolInner<K> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut PoolMetricsInner)) {
        update(&mut self.metrics.lock());
    }

    pub(crate) fn wake(&self) {
        if let Some(waker) = self.waker.get() {
            waker.wake();
        }
    }

    /// Clone of the inventory, so callers can act on entries without
    /// holding the inventory lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ConnectionEntry<K>>> {
        self.entries.read().clone()
    }

    fn claim_available(&self) -> Option<Arc<ConnectionEntry<K>>> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.try_move(EntryState::Available, EntryState::Busy))
            .cloned()
    }

    fn free_count(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.state().is_free())
            .count()
    }

    /// Caller-facing checkout, counted in the checkout metrics.
    pub(crate) fn acquire_entry(self: &Arc<Self>, grow_if_low: bool) -> Option<Arc<ConnectionEntry<K>>> {
        let acquired = self.take_entry(grow_if_low);
        match &acquired {
            Some(entry) => {
                tracing::trace!(connection = %entry.id(), "connection acquired");
                self.record(|m| m.checkouts_successful += 1);
            }
            None => self.record(|m| m.checkouts_failed += 1),
        }
        acquired
    }

    /// Claim a healthy `Available` entry, without touching the metrics.
    pub(crate) fn take_entry(self: &Arc<Self>, grow_if_low: bool) -> Option<Arc<ConnectionEntry<K>>> {
        if self.is_closed() {
            return None;
        }

        // A connection found broken on acquisition is discarded and the scan
        // is retried once.
        let mut acquired = None;
        for _ in 0..2 {
            let Some(entry) = self.claim_available() else {
                break;
            };
            let broken = entry
                .conn
                .lock()
                .as_ref()
                .is_none_or(|conn| conn.status() == ConnectionStatus::Bad);
            if !broken {
                acquired = Some(entry);
                break;
            }

            tracing::warn!(connection = %entry.id(), "discarding broken connection");
            if entry.try_move(EntryState::Busy, EntryState::Disconnecting) {
                self.finish_entry(&entry, PoolError::Disconnected);
            }
            self.grow(0);
        }

        if grow_if_low && self.free_count() < self.config.min_free_connections {
            self.grow(0);
        }
        acquired
    }

    /// Open at least `min_free_connections` (or `requested`, if larger) new
    /// connections. Concurrent calls coalesce into one.
    fn grow(self: &Arc<Self>, requested: usize) {
        if self.is_closed() {
            return;
        }
        if self.growing.swap(true, Ordering::AcqRel) {
            tracing::trace!("pool growth already in progress");
            return;
        }
        let count = requested.max(self.config.min_free_connections);
        let opened = self.open_connections(count);
        tracing::debug!(requested = count, opened, "pool grown");
        self.growing.store(false, Ordering::Release);
    }

    /// Start `count` new connections, reusing `Invalid` slots before
    /// appending. Returns how many were started.
    pub(crate) fn open_connections(self: &Arc<Self>, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let mut claimed: Vec<Arc<ConnectionEntry<K>>> = Vec::with_capacity(count);
        claimed.extend(
            self.entries
                .read()
                .iter()
                .filter(|entry| entry.try_move(EntryState::Invalid, EntryState::Connecting))
                .take(count)
                .cloned(),
        );

        let missing = count - claimed.len();
        if missing > 0 {
            let mut entries = self.entries.write();
            let room = self
                .config
                .max_connections
                .map_or(missing, |max| max.saturating_sub(entries.len()));
            let adding = missing.min(room);
            if adding < missing {
                tracing::warn!(
                    max = ?self.config.max_connections,
                    skipped = missing - adding,
                    "connection cap reached"
                );
            }
            for _ in 0..adding {
                let entry = Arc::new(ConnectionEntry::new(
                    EntryId(entries.len()),
                    EntryState::Connecting,
                ));
                entries.push(Arc::clone(&entry));
                claimed.push(entry);
            }
        }

        for entry in &claimed {
            self.start_entry(entry);
        }
        claimed.len()
    }

    fn start_entry(self: &Arc<Self>, entry: &Arc<ConnectionEntry<K>>) {
        let conn = match self.connector.start_connect(&self.config.conninfo) {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(connection = %entry.id(), error = %err, "failed to start connection");
                self.record(|m| m.establishment_failures += 1);
                entry.try_move(EntryState::Connecting, EntryState::Invalid);
                return;
            }
        };
        self.record(|m| m.connections_created += 1);

        let failure = (conn.status() == ConnectionStatus::Bad).then(|| conn.error_message());
        {
            let mut guard = entry.conn.lock();
            if entry.state() != EntryState::Connecting || guard.is_some() {
                // Shut down while the connection was starting.
                drop(guard);
                conn.finish();
                self.record(|m| m.connections_closed += 1);
                return;
            }
            *guard = Some(conn);
        }

        // Shutdown may have swept the inventory before this entry was added.
        if self.is_closed() {
            self.disconnect_entry(entry, PoolError::ShutdownInProgress);
            return;
        }
        match failure {
            Some(message) => self.connection_failed(entry, &message),
            None => self.advance_connect(entry),
        }
    }

    /// Release the handle of an entry this caller moved to `Disconnecting`,
    /// then mark it `Invalid`. An in-flight query fails with `reason`.
    pub(crate) fn finish_entry(&self, entry: &ConnectionEntry<K>, reason: PoolError) {
        let conn = {
            let mut guard = entry.conn.lock();
            self.reactor.unregister(entry.token());
            guard.take()
        };
        let in_flight = entry.in_flight.lock().take();

        if let Some(conn) = conn {
            conn.finish();
            self.record(|m| m.connections_closed += 1);
            tracing::debug!(
                connection = %entry.id(),
                age_ms = u64::try_from(entry.age().as_millis()).unwrap_or(u64::MAX),
                "connection closed"
            );
        }
        entry.try_move(EntryState::Disconnecting, EntryState::Invalid);

        if let Some(completion) = in_flight {
            self.record(|m| m.queries_failed += 1);
            completion(Err(reason));
        }
    }

    /// Disconnect an entry from any state that has a single owner to
    /// displace. Returns `false` if another thread owns the entry or it is
    /// already gone.
    pub(crate) fn disconnect_entry(&self, entry: &ConnectionEntry<K>, reason: PoolError) -> bool {
        const DISCONNECTABLE: [EntryState; 4] = [
            EntryState::Connecting,
            EntryState::Available,
            EntryState::Busy,
            EntryState::IdleReady,
        ];

        for from in DISCONNECTABLE {
            if entry.try_move(from, EntryState::Disconnecting) {
                self.finish_entry(entry, reason);
                return true;
            }
        }
        false
    }

    pub(crate) fn shutdown(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);

        let pending = self.pending.close();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "failing queued requests");
        }
        for request in pending {
            self.record(|m| m.queries_failed += 1);
            (request.completion)(Err(PoolError::ShutdownInProgress));
        }

        // Entries mid-validation or mid-disconnect belong to another thread
        // that observes the closed flag; wait for them to settle.
        loop {
            let entries = self.snapshot();
            let mut unsettled = 0;
            for entry in &entries {
                self.disconnect_entry(entry, PoolError::ShutdownInProgress);
                if entry.state() != EntryState::Invalid {
                    unsettled += 1;
                }
            }
            if unsettled == 0 {
                break;
            }
            std::thread::yield_now();
        }

        if first {
            tracing::info!("connection pool shut down");
        }
    }

    fn status(&self) -> PoolStatus {
        let mut status = PoolStatus {
            max: self.config.max_connections,
            pending: self.pending.len(),
            ..PoolStatus::default()
        };
        let entries = self.entries.read();
        status.total = entries.len();
        for entry in entries.iter() {
            let counter = match entry.state() {
                EntryState::Invalid => &mut status.invalid,
                EntryState::Disconnecting => &mut status.disconnecting,
                EntryState::Connecting => &mut status.connecting,
                EntryState::Available => &mut status.available,
                EntryState::Busy => &mut status.busy,
                EntryState::Validating => &mut status.validating,
                EntryState::IdleReady => &mut status.idle_ready,
            };
            *counter += 1;
        }
        status
    }
}

impl<K: Connector> Drop for PoolInner<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .conninfo("host=db dbname=app")
///     .min_connections(8)
///     .connector(connector)
///     .reactor(reactor)
///     .build()?;
/// ```
pub struct PoolBuilder<K: Connector> {
    pool_config: PoolConfig,
    connector: Option<K>,
    reactor: Option<Arc<dyn Reactor>>,
}

impl<K: Connector> PoolBuilder<K> {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            connector: None,
            reactor: None,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the connection string.
    #[must_use]
    pub fn conninfo(mut self, conninfo: impl Into<String>) -> Self {
        self.pool_config.conninfo = conninfo.into();
        self
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn min_connections(mut self, count: usize) -> Self {
        self.pool_config.min_connections = count;
        self
    }

    /// Set the free-connection low-water mark.
    #[must_use]
    pub fn min_free_connections(mut self, count: usize) -> Self {
        self.pool_config.min_free_connections = count;
        self
    }

    /// Set the free-connection high-water mark.
    #[must_use]
    pub fn max_free_connections(mut self, count: usize) -> Self {
        self.pool_config.max_free_connections = count;
        self
    }

    /// Cap the total number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.pool_config.max_connections = Some(count);
        self
    }

    /// Set the connector that opens connections.
    #[must_use]
    pub fn connector(mut self, connector: K) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the reactor that drives connection sockets.
    #[must_use]
    pub fn reactor(mut self, reactor: Arc<dyn Reactor>) -> Self {
        self.reactor = Some(reactor);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<K>, PoolError> {
        let connector = self
            .connector
            .ok_or_else(|| PoolError::Config("a connector is required".into()))?;
        let reactor = self
            .reactor
            .ok_or_else(|| PoolError::Config("a reactor is required".into()))?;
        Pool::new(self.pool_config, connector, reactor)
    }
}

impl<K: Connector> Default for PoolBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection checked out of the pool.
///
/// Returned to the pool when released or dropped.
pub struct PooledConnection<K: Connector> {
    pool: Arc<PoolInner<K>>,
    entry: Arc<ConnectionEntry<K>>,
    released: bool,
}

impl<K: Connector> PooledConnection<K> {
    pub(crate) fn new(pool: Arc<PoolInner<K>>, entry: Arc<ConnectionEntry<K>>) -> Self {
        Self {
            pool,
            entry,
            released: false,
        }
    }

    /// Inventory slot of this connection.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.entry.id()
    }

    /// Take the next pending result. `None` once all results are consumed,
    /// or if the pool disconnected this connection during shutdown.
    pub fn next_result(&mut self) -> Option<<K::Connection as Connection>::Output> {
        let mut guard = self.entry.conn.lock();
        if self.entry.state() != EntryState::Busy {
            return None;
        }
        guard.as_mut()?.next_result()
    }

    /// Take every pending result.
    pub fn results(&mut self) -> Vec<<K::Connection as Connection>::Output> {
        std::iter::from_fn(|| self.next_result()).collect()
    }

    /// Current transaction state of the session.
    #[must_use]
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.entry
            .conn
            .lock()
            .as_ref()
            .map(Connection::transaction_status)
    }

    /// Run `f` against the underlying protocol handle.
    pub fn with_connection<R>(&mut self, f: impl FnOnce(&mut K::Connection) -> R) -> Option<R> {
        let mut guard = self.entry.conn.lock();
        if self.entry.state() != EntryState::Busy {
            return None;
        }
        guard.as_mut().map(f)
    }

    /// Send another query on this same connection and hand it back to
    /// `handler` once the result is ready.
    ///
    /// Keeps the session (and any open transaction) across queries. On
    /// `Err` the connection has already been returned to the pool and
    /// `handler` is dropped without being called.
    pub fn send_query<T, F>(
        mut self,
        query: &str,
        params: &ParamSet,
        result_format: Format,
        context: T,
        handler: F,
    ) -> Result<(), PoolError>
    where
        T: Send + 'static,
        F: FnOnce(T, QueryResult<K>) + Send + 'static,
    {
        self.released = true;
        let completion: Completion<K> = Box::new(move |result| handler(context, result));
        self.pool
            .dispatch(&self.entry, query, params, result_format, completion)
            .map_err(|(err, _)| err)
    }

    /// Return the connection to the pool. A session left outside the idle
    /// transaction state is reset first.
    pub fn release(mut self) {
        self.released = true;
        self.pool.release_entry(&self.entry, ReleaseMode::Validate);
    }

    /// Return the connection to the pool, resetting the session regardless
    /// of its state.
    pub fn reset(mut self) {
        self.released = true;
        self.pool.release_entry(&self.entry, ReleaseMode::Reset);
    }

    /// Close the connection instead of returning it.
    pub fn disconnect(mut self) {
        self.released = true;
        self.pool.disconnect_entry(&self.entry, PoolError::Disconnected);
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release_entry(&self.entry, ReleaseMode::Validate);
        }
    }
}

impl<K: Connector> fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.entry.id())
            .field("state", &self.entry.state())
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Inventory size, including `Invalid` slots.
    pub total: usize,
    /// Slots without a connection.
    pub invalid: usize,
    /// Connections being established or reset.
    pub connecting: usize,
    /// Idle connections ready to be acquired.
    pub available: usize,
    /// Connections in use.
    pub busy: usize,
    /// Connections being validated after release.
    pub validating: usize,
    /// Validated connections waiting for promotion.
    pub idle_ready: usize,
    /// Connections being closed.
    pub disconnecting: usize,
    /// Requests waiting for a connection.
    pub pending: usize,
    /// Configured cap, if any.
    pub max: Option<usize>,
}

impl PoolStatus {
    /// Connections counted as free for growth decisions.
    #[must_use]
    pub fn free(&self) -> usize {
        self.available + self.connecting
    }

    /// Connections holding a live handle.
    #[must_use]
    pub fn live(&self) -> usize {
        self.total - self.invalid
    }

    /// Calculate the utilization percentage of live connections.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let live = self.live();
        if live == 0 {
            return 0.0;
        }
        (self.busy as f64 / live as f64) * 100.0
    }

    /// Check if the pool is at its configured cap.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max.is_some_and(|max| self.live() >= max)
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Connection attempts that failed.
    pub establishment_failures: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Checkouts that found no available connection.
    pub checkouts_failed: u64,
    /// Queries dispatched to a connection.
    pub queries_dispatched: u64,
    /// Queries that waited in the pending queue.
    pub queries_queued: u64,
    /// Queries whose handler received an error.
    pub queries_failed: u64,
    /// Connection resets performed.
    pub resets_performed: u64,
    /// Connection resets that failed.
    pub resets_failed: u64,
    /// Total time requests spent queued.
    pub queue_wait_total: Duration,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Average time a queued request waited for a connection.
    #[must_use]
    pub fn average_queue_wait(&self) -> Duration {
        match u32::try_from(self.queries_queued) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.queue_wait_total / count,
        }
    }
}
