//! Scripted in-memory protocol connections.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use evpg_protocol::{
    Connection, ConnectionStatus, Connector, Descriptor, PollingStatus, ProtocolError,
    TransactionStatus,
};
use evpg_types::{Format, ParamSet};
use parking_lot::Mutex;

/// Establishment steps used when none are configured: one write round trip,
/// one read round trip, then ready.
pub const DEFAULT_HANDSHAKE: [PollingStatus; 3] =
    [PollingStatus::Writing, PollingStatus::Reading, PollingStatus::Ok];

/// Base value for the fake socket numbers handed to the reactor.
const DESCRIPTOR_BASE: usize = 1000;

/// One result produced by a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResult {
    /// Query text that produced this result.
    pub query: String,
    /// Number of rows the result pretends to hold.
    pub rows: usize,
}

/// A query recorded by a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentQuery {
    /// Query text.
    pub query: String,
    /// Parameters exactly as the pool passed them.
    pub params: ParamSet,
    /// Requested result format.
    pub result_format: Format,
}

#[derive(Debug)]
struct MockState {
    id: usize,
    handshake: VecDeque<PollingStatus>,
    reset_handshake: Vec<PollingStatus>,
    status: ConnectionStatus,
    transaction: TransactionStatus,
    busy_rounds: usize,
    remaining_rounds: usize,
    awaiting: bool,
    prepared: Vec<MockResult>,
    results: VecDeque<MockResult>,
    scripted: VecDeque<Vec<MockResult>>,
    sent: Vec<SentQuery>,
    fail_send: bool,
    fail_consume: bool,
    fail_reset: bool,
    consumes: usize,
    polls: usize,
    resets: usize,
    finishes: usize,
}

impl MockState {
    fn new(id: usize, handshake: &[PollingStatus], status: ConnectionStatus) -> Self {
        Self {
            id,
            handshake: handshake.iter().copied().collect(),
            reset_handshake: handshake.to_vec(),
            status,
            transaction: TransactionStatus::Idle,
            busy_rounds: 1,
            remaining_rounds: 0,
            awaiting: false,
            prepared: Vec::new(),
            results: VecDeque::new(),
            scripted: VecDeque::new(),
            sent: Vec::new(),
            fail_send: false,
            fail_consume: false,
            fail_reset: false,
            consumes: 0,
            polls: 0,
            resets: 0,
            finishes: 0,
        }
    }

    fn complete_query(&mut self) {
        self.awaiting = false;
        self.results.extend(self.prepared.drain(..));
    }
}

#[derive(Debug)]
struct Shared {
    handshake: Mutex<Vec<PollingStatus>>,
    fail_starts: AtomicUsize,
    bad_starts: AtomicUsize,
    start_attempts: AtomicUsize,
    finished: AtomicUsize,
    connections: Mutex<Vec<MockControl>>,
}

/// A [`Connector`] producing scripted [`MockConnection`]s.
#[derive(Debug, Clone)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    /// Create a connector whose connections complete [`DEFAULT_HANDSHAKE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_handshake(&DEFAULT_HANDSHAKE)
    }

    /// Create a connector whose connections run through `steps`.
    #[must_use]
    pub fn with_handshake(steps: &[PollingStatus]) -> Self {
        Self {
            shared: Arc::new(Shared {
                handshake: Mutex::new(steps.to_vec()),
                fail_starts: AtomicUsize::new(0),
                bad_starts: AtomicUsize::new(0),
                start_attempts: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Change the handshake script for connections started from now on.
    pub fn set_handshake(&self, steps: &[PollingStatus]) {
        *self.shared.handshake.lock() = steps.to_vec();
    }

    /// Make the next `count` calls to `start_connect` return an error.
    pub fn fail_next_starts(&self, count: usize) {
        self.shared.fail_starts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` started connections report a bad status.
    pub fn bad_next_starts(&self, count: usize) {
        self.shared.bad_starts.store(count, Ordering::SeqCst);
    }

    /// Number of `start_connect` calls, including failed ones.
    #[must_use]
    pub fn start_attempts(&self) -> usize {
        self.shared.start_attempts.load(Ordering::SeqCst)
    }

    /// Number of handles created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Number of `finish` calls across all handles.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// Control handle of the `index`-th created connection.
    #[must_use]
    pub fn connection(&self, index: usize) -> Option<MockControl> {
        self.shared.connections.lock().get(index).cloned()
    }

    /// Control handles of every created connection, in creation order.
    #[must_use]
    pub fn connections(&self) -> Vec<MockControl> {
        self.shared.connections.lock().clone()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn start_connect(&self, conninfo: &str) -> Result<MockConnection, ProtocolError> {
        self.shared.start_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.shared.fail_starts) {
            return Err(ProtocolError::ConnectStart(format!(
                "out of memory starting {conninfo}"
            )));
        }

        let status = if Self::take_one(&self.shared.bad_starts) {
            ConnectionStatus::Bad
        } else {
            ConnectionStatus::Ok
        };

        let handshake = self.shared.handshake.lock().clone();
        let mut connections = self.shared.connections.lock();
        let id = connections.len();
        let control = MockControl {
            state: Arc::new(Mutex::new(MockState::new(id, &handshake, status))),
        };
        connections.push(control.clone());
        tracing::trace!(connection = id, "mock connection started");

        Ok(MockConnection {
            control,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Test-side handle to inspect and script one mock connection.
#[derive(Debug, Clone)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

impl MockControl {
    /// Creation index of the connection.
    #[must_use]
    pub fn id(&self) -> usize {
        self.state.lock().id
    }

    /// How many times the handle was finished. Must end up exactly 1.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.state.lock().finishes
    }

    /// Whether the handle was finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finish_count() > 0
    }

    /// Set the transaction state reported from now on.
    pub fn set_transaction_status(&self, status: TransactionStatus) {
        self.state.lock().transaction = status;
    }

    /// Mark the connection as broken.
    pub fn set_bad(&self) {
        self.state.lock().status = ConnectionStatus::Bad;
    }

    /// Make the next `send_query` fail.
    pub fn fail_next_send(&self) {
        self.state.lock().fail_send = true;
    }

    /// Make the next `consume_input` fail.
    pub fn fail_next_consume(&self) {
        self.state.lock().fail_consume = true;
    }

    /// Make the next `reset_start` fail.
    pub fn fail_next_reset(&self) {
        self.state.lock().fail_reset = true;
    }

    /// Number of `consume_input` calls a query needs before its result is
    /// complete (default 1).
    pub fn set_busy_rounds(&self, rounds: usize) {
        self.state.lock().busy_rounds = rounds;
    }

    /// Results the next query will produce, replacing the default single
    /// result.
    pub fn script_results(&self, results: Vec<MockResult>) {
        self.state.lock().scripted.push_back(results);
    }

    /// Handshake steps run after a reset.
    pub fn set_reset_handshake(&self, steps: &[PollingStatus]) {
        self.state.lock().reset_handshake = steps.to_vec();
    }

    /// Queries dispatched on this connection, in order.
    #[must_use]
    pub fn sent_queries(&self) -> Vec<SentQuery> {
        self.state.lock().sent.clone()
    }

    /// Number of resets started.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    /// Number of `consume_input` calls.
    #[must_use]
    pub fn consume_count(&self) -> usize {
        self.state.lock().consumes
    }

    /// Number of `poll_connect` calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.state.lock().polls
    }

    /// Results produced but not yet taken.
    #[must_use]
    pub fn unread_results(&self) -> usize {
        self.state.lock().results.len()
    }
}

/// An in-memory [`Connection`] driven by its [`MockControl`].
#[derive(Debug)]
pub struct MockConnection {
    control: MockControl,
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Control handle for this connection.
    #[must_use]
    pub fn control(&self) -> &MockControl {
        &self.control
    }
}

impl Connection for MockConnection {
    type Output = MockResult;

    fn status(&self) -> ConnectionStatus {
        self.control.state.lock().status
    }

    fn poll_connect(&mut self) -> PollingStatus {
        let mut state = self.control.state.lock();
        state.polls += 1;
        if state.status == ConnectionStatus::Bad {
            return PollingStatus::Failed;
        }
        let step = state.handshake.pop_front().unwrap_or(PollingStatus::Ok);
        if step == PollingStatus::Failed {
            state.status = ConnectionStatus::Bad;
        }
        step
    }

    fn socket(&self) -> Option<Descriptor> {
        let state = self.control.state.lock();
        let raw = DESCRIPTOR_BASE + state.id;
        (state.finishes == 0).then_some(Descriptor(raw as _))
    }

    fn send_query(
        &mut self,
        query: &str,
        params: &ParamSet,
        result_format: Format,
    ) -> Result<(), ProtocolError> {
        let mut state = self.control.state.lock();
        if std::mem::take(&mut state.fail_send) {
            return Err(ProtocolError::Send("another command is already in progress".into()));
        }
        params.lengths()?;
        state.sent.push(SentQuery {
            query: query.to_string(),
            params: params.clone(),
            result_format,
        });
        let prepared = state.scripted.pop_front().unwrap_or_else(|| {
            vec![MockResult {
                query: query.to_string(),
                rows: params.len(),
            }]
        });
        state.prepared = prepared;
        state.awaiting = true;
        state.remaining_rounds = state.busy_rounds;
        if state.remaining_rounds == 0 {
            state.complete_query();
        }
        Ok(())
    }

    fn consume_input(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.control.state.lock();
        state.consumes += 1;
        if std::mem::take(&mut state.fail_consume) {
            state.status = ConnectionStatus::Bad;
            return Err(ProtocolError::Consume("server closed the connection unexpectedly".into()));
        }
        if state.awaiting {
            state.remaining_rounds = state.remaining_rounds.saturating_sub(1);
            if state.remaining_rounds == 0 {
                state.complete_query();
            }
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.control.state.lock().awaiting
    }

    fn next_result(&mut self) -> Option<MockResult> {
        let mut state = self.control.state.lock();
        if state.awaiting {
            return None;
        }
        state.results.pop_front()
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.control.state.lock().transaction
    }

    fn reset_start(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.control.state.lock();
        state.resets += 1;
        if std::mem::take(&mut state.fail_reset) {
            state.status = ConnectionStatus::Bad;
            return Err(ProtocolError::Reset("could not reconnect".into()));
        }
        state.handshake = state.reset_handshake.iter().copied().collect();
        state.status = ConnectionStatus::Ok;
        state.transaction = TransactionStatus::Idle;
        state.awaiting = false;
        state.prepared.clear();
        state.results.clear();
        Ok(())
    }

    fn error_message(&self) -> String {
        let state = self.control.state.lock();
        match state.status {
            ConnectionStatus::Ok => String::new(),
            ConnectionStatus::Bad => format!("mock connection {} is broken", state.id),
        }
    }

    fn finish(self) {
        self.control.state.lock().finishes += 1;
        self.shared.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_then_query() {
        let connector = MockConnector::new();
        let mut conn = connector.start_connect("postgresql://localhost/test").unwrap();

        assert_eq!(conn.poll_connect(), PollingStatus::Writing);
        assert_eq!(conn.poll_connect(), PollingStatus::Reading);
        assert_eq!(conn.poll_connect(), PollingStatus::Ok);

        let mut params = ParamSet::new();
        params.add(1_i32);
        conn.send_query("SELECT $1", &params, Format::Binary).unwrap();
        assert!(conn.is_busy());
        conn.consume_input().unwrap();
        assert!(!conn.is_busy());
        assert_eq!(conn.next_result().unwrap().query, "SELECT $1");
        assert!(conn.next_result().is_none());

        let control = conn.control().clone();
        conn.finish();
        assert_eq!(control.finish_count(), 1);
        assert_eq!(connector.finished(), 1);
    }

    #[test]
    fn test_failed_starts_are_counted() {
        let connector = MockConnector::new();
        connector.fail_next_starts(1);
        assert!(connector.start_connect("x").is_err());
        assert!(connector.start_connect("x").is_ok());
        assert_eq!(connector.start_attempts(), 2);
        assert_eq!(connector.created(), 1);
    }

    #[test]
    fn test_reset_reruns_handshake() {
        let connector = MockConnector::with_handshake(&[PollingStatus::Ok]);
        let mut conn = connector.start_connect("x").unwrap();
        assert_eq!(conn.poll_connect(), PollingStatus::Ok);
        conn.control().set_reset_handshake(&[PollingStatus::Reading, PollingStatus::Ok]);
        conn.control().set_transaction_status(TransactionStatus::InError);

        conn.reset_start().unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
        assert_eq!(conn.poll_connect(), PollingStatus::Reading);
        assert_eq!(conn.poll_connect(), PollingStatus::Ok);
        conn.finish();
    }
}
