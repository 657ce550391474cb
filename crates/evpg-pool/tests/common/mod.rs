//! Shared fixtures for pool integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use evpg_pool::{Pool, PoolConfig, PoolError, QueryResult};
use evpg_testing::{ManualReactor, MockConnector, MockResult};
use parking_lot::Mutex;

pub type Outcome = Result<Vec<MockResult>, PoolError>;
pub type Log = Arc<Mutex<Vec<(u32, Outcome)>>>;

pub fn config(min: usize, min_free: usize) -> PoolConfig {
    PoolConfig::new("host=localhost dbname=evpg_test")
        .min_connections(min)
        .min_free_connections(min_free)
        .max_free_connections(min_free.max(7))
}

pub fn setup(min: usize, min_free: usize) -> (Pool<MockConnector>, MockConnector, Arc<ManualReactor>) {
    setup_with(MockConnector::new(), config(min, min_free))
}

pub fn setup_with(
    connector: MockConnector,
    config: PoolConfig,
) -> (Pool<MockConnector>, MockConnector, Arc<ManualReactor>) {
    let reactor = ManualReactor::new();
    let pool = Pool::new(config, connector.clone(), reactor.clone()).unwrap();
    (pool, connector, reactor)
}

/// Run the reactor until every handshake (and anything else pending) is done.
pub fn establish(reactor: &ManualReactor) {
    reactor.run_until_idle(64);
}

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that reads every result, records them under the request tag and
/// drops the connection.
pub fn record(log: &Log) -> impl FnOnce(u32, QueryResult<MockConnector>) + Send + 'static {
    let log = Arc::clone(log);
    move |tag, result| {
        let outcome = result.map(|mut conn| conn.results());
        log.lock().push((tag, outcome));
    }
}

pub fn tags(log: &Log) -> Vec<u32> {
    log.lock().iter().map(|(tag, _)| *tag).collect()
}
