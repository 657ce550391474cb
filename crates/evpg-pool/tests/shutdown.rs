//! Shutdown tests: queued and in-flight requests fail exactly once, every
//! handle is finished exactly once, and late events are ignored.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{establish, log, record, setup, tags};
use evpg_pool::{EntryState, Format, ParamSet, PoolError, Token};

fn assert_all_finished_once(connector: &evpg_testing::MockConnector) {
    for control in connector.connections() {
        assert_eq!(control.finish_count(), 1, "connection {}", control.id());
    }
}

#[test]
fn test_shutdown_fails_queued_requests() {
    let (pool, connector, _reactor) = setup(2, 0);
    let results = log();

    pool.submit_query("SELECT 1", &ParamSet::new(), Format::Text, 1, record(&results))
        .unwrap();
    pool.submit_query("SELECT 2", &ParamSet::new(), Format::Text, 2, record(&results))
        .unwrap();
    assert_eq!(pool.pending_requests(), 2);

    pool.shutdown();

    let outcomes = results.lock();
    assert_eq!(outcomes.len(), 2);
    for (_, outcome) in outcomes.iter() {
        assert_eq!(outcome.as_ref().unwrap_err(), &PoolError::ShutdownInProgress);
    }
    drop(outcomes);

    let status = pool.status();
    assert_eq!(status.invalid, status.total);
    assert_eq!(status.pending, 0);
    assert_all_finished_once(&connector);
    assert!(pool.is_closed());
}

#[test]
fn test_shutdown_fails_in_flight_query() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let results = log();

    pool.submit_query("SELECT 1", &ParamSet::new(), Format::Text, 7, record(&results))
        .unwrap();
    pool.shutdown();

    assert_eq!(tags(&results), vec![7]);
    assert!(matches!(
        results.lock()[0].1,
        Err(PoolError::ShutdownInProgress)
    ));
    assert!(!reactor.is_registered(Token(0)));
    assert_all_finished_once(&connector);
}

#[test]
fn test_submit_after_shutdown_rejected() {
    let (pool, _connector, reactor) = setup(1, 0);
    establish(&reactor);
    pool.shutdown();

    let called = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&called);
    let err = pool
        .submit_query("SELECT 1", &ParamSet::new(), Format::Text, (), move |(), _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();

    assert_eq!(err, PoolError::ShutdownInProgress);
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert!(pool.acquire(true).is_none());
}

#[test]
fn test_shutdown_with_mixed_states() {
    let (pool, connector, reactor) = setup(4, 0);
    // Entries 0 and 1 established, entry 2 mid-handshake, entry 3 untouched.
    for token in [Token(0), Token(0), Token(1), Token(1), Token(2)] {
        assert!(reactor.fire(token));
    }

    let held = pool.acquire(false).unwrap();
    let idle = pool.acquire(false).unwrap();
    idle.release();
    let status = pool.status();
    assert_eq!(status.busy, 1);
    assert_eq!(status.idle_ready, 1);
    assert_eq!(status.connecting, 2);

    pool.shutdown();

    let status = pool.status();
    assert_eq!(status.invalid, 4);
    assert_all_finished_once(&connector);

    // A guard that outlived shutdown sees no results and releases quietly.
    let mut held = held;
    assert!(held.next_result().is_none());
    drop(held);
    assert_all_finished_once(&connector);
}

#[test]
fn test_send_on_guard_after_shutdown_reports_shutdown() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let held = pool.acquire(false).unwrap();

    pool.shutdown();

    let called = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&called);
    let err = held
        .send_query("SELECT 1", &ParamSet::new(), Format::Text, (), move |(), _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();

    assert_eq!(err, PoolError::ShutdownInProgress);
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert!(connector.connection(0).unwrap().sent_queries().is_empty());
    assert_all_finished_once(&connector);
}

#[test]
fn test_shutdown_mid_handshake() {
    let (pool, connector, reactor) = setup(3, 0);
    reactor.fire(Token(1));

    pool.shutdown();
    assert_eq!(pool.status().invalid, 3);
    assert!(reactor.registered().is_empty());
    assert_all_finished_once(&connector);

    // Late readiness for a finished connection has nothing to fire.
    assert!(!reactor.fire(Token(1)));
}

#[test]
fn test_late_wake_after_shutdown_is_harmless() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    drop(pool.acquire(false).unwrap());
    assert_eq!(reactor.pending_wakes(), 1);

    pool.shutdown();
    reactor.run_wakes();

    assert_eq!(pool.entry_state(evpg_pool::EntryId(0)), Some(EntryState::Invalid));
    assert_all_finished_once(&connector);
}

#[test]
fn test_shutdown_is_idempotent() {
    let (pool, connector, reactor) = setup(2, 0);
    establish(&reactor);

    pool.shutdown();
    pool.shutdown();
    assert_eq!(connector.finished(), 2);
    assert_all_finished_once(&connector);
}

#[test]
fn test_dropping_last_pool_handle_shuts_down() {
    let (pool, connector, reactor) = setup(3, 0);
    establish(&reactor);
    let results = log();
    let second = pool.clone();

    drop(pool);
    assert_eq!(connector.finished(), 0, "a clone is still alive");

    second
        .submit_query("SELECT 1", &ParamSet::new(), Format::Text, 1, record(&results))
        .unwrap();
    drop(second);

    assert_eq!(connector.finished(), 3);
    assert_all_finished_once(&connector);
    assert!(matches!(
        results.lock()[0].1,
        Err(PoolError::ShutdownInProgress)
    ));

    // Callbacks still held by the reactor are inert once the pool is gone.
    assert_eq!(reactor.fire_all(), 0);
    reactor.run_wakes();
}

#[test]
fn test_shutdown_from_result_handler() {
    let (pool, connector, reactor) = setup(2, 0);
    establish(&reactor);
    let results = log();

    let handle = pool.clone();
    pool.submit_query("SELECT 1", &ParamSet::new(), Format::Text, (), move |(), result| {
        let conn = result.unwrap();
        handle.shutdown();
        drop(conn);
    })
    .unwrap();
    pool.submit_query("SELECT 2", &ParamSet::new(), Format::Text, 2, record(&results))
        .unwrap();

    reactor.fire(Token(0));

    assert!(pool.is_closed());
    assert_eq!(pool.status().invalid, 2);
    assert!(matches!(
        results.lock()[0].1,
        Err(PoolError::ShutdownInProgress)
    ));
    assert_all_finished_once(&connector);
}
