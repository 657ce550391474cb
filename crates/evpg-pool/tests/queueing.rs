//! Query submission tests: immediate dispatch, queueing, FIFO draining and
//! result delivery.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{config, establish, log, record, setup, tags};
use evpg_pool::{
    EntryId, EntryState, Format, ParamSet, PoolError, ReactorError, Submission, Token,
};
use evpg_testing::{MockConnector, MockResult};

fn no_params() -> ParamSet {
    ParamSet::new()
}

// =============================================================================
// Immediate dispatch
// =============================================================================

#[test]
fn test_submit_dispatches_on_available_connection() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let results = log();

    let mut params = ParamSet::new();
    params.add(7_i32).add("seven");
    let submission = pool
        .submit_query("SELECT $1, $2", &params, Format::Binary, 1, record(&results))
        .unwrap();
    assert_eq!(submission, Submission::Dispatched(EntryId(0)));
    assert_eq!(reactor.interest(Token(0)), Some(evpg_pool::Interest::Read));
    assert!(results.lock().is_empty());

    let sent = connector.connection(0).unwrap().sent_queries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].query, "SELECT $1, $2");
    assert_eq!(sent[0].result_format, Format::Binary);

    assert!(reactor.fire(Token(0)));
    let outcomes = results.lock();
    assert_eq!(outcomes.len(), 1);
    let (tag, outcome) = &outcomes[0];
    assert_eq!(*tag, 1);
    assert_eq!(
        outcome.as_ref().unwrap(),
        &vec![MockResult {
            query: "SELECT $1, $2".into(),
            rows: 2
        }]
    );
}

#[test]
fn test_result_spanning_several_reads() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    connector.connection(0).unwrap().set_busy_rounds(3);
    let results = log();

    pool.submit_query("SELECT pg_sleep(0)", &no_params(), Format::Text, 1, record(&results))
        .unwrap();

    assert!(reactor.fire(Token(0)));
    assert!(reactor.fire(Token(0)));
    assert!(results.lock().is_empty());
    assert!(reactor.fire(Token(0)));
    assert_eq!(tags(&results), vec![1]);
    assert_eq!(connector.connection(0).unwrap().consume_count(), 3);
}

#[test]
fn test_multiple_results_delivered_in_order() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    connector.connection(0).unwrap().script_results(vec![
        MockResult {
            query: "first".into(),
            rows: 1,
        },
        MockResult {
            query: "second".into(),
            rows: 4,
        },
    ]);
    let results = log();

    pool.submit_query("SELECT 1; SELECT 2", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    reactor.fire(Token(0));

    let outcomes = results.lock();
    let rows: Vec<usize> = outcomes[0].1.as_ref().unwrap().iter().map(|r| r.rows).collect();
    assert_eq!(rows, vec![1, 4]);
}

#[test]
fn test_unread_results_discarded_on_release() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    connector.connection(0).unwrap().script_results(vec![
        MockResult {
            query: "a".into(),
            rows: 1,
        },
        MockResult {
            query: "b".into(),
            rows: 1,
        },
    ]);

    pool.submit_query("SELECT 1", &no_params(), Format::Text, (), |(), result| {
        let mut conn = result.unwrap();
        assert!(conn.next_result().is_some());
        // Second result left unread.
    })
    .unwrap();
    reactor.fire(Token(0));

    assert_eq!(connector.connection(0).unwrap().unread_results(), 0);
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::IdleReady));
}

#[test]
fn test_parameters_copied_at_submission() {
    let (pool, connector, reactor) = setup(1, 0);
    let mut params = ParamSet::new();
    params.add("original");

    let submission = pool
        .submit_query("SELECT $1", &params, Format::Text, (), |(), _| {})
        .unwrap();
    assert_eq!(submission, Submission::Queued { depth: 1 });

    params.clear();
    params.add("changed").add(1_i64);

    establish(&reactor);
    let sent = connector.connection(0).unwrap().sent_queries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].params.len(), 1);
    assert_eq!(sent[0].params.get(0).unwrap().value(), Some(&b"original"[..]));
}

// =============================================================================
// Queueing
// =============================================================================

#[test]
fn test_submit_queues_when_nothing_available() {
    let (pool, _connector, _reactor) = setup(5, 2);
    let results = log();

    let first = pool
        .submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    let second = pool
        .submit_query("SELECT 2", &no_params(), Format::Text, 2, record(&results))
        .unwrap();

    assert_eq!(first, Submission::Queued { depth: 1 });
    assert_eq!(second, Submission::Queued { depth: 2 });
    assert_eq!(pool.pending_requests(), 2);
    assert!(results.lock().is_empty());
    assert_eq!(pool.metrics().queries_queued, 2);
}

#[test]
fn test_queued_request_dispatched_when_connection_ready() {
    let (pool, connector, reactor) = setup(1, 0);
    let results = log();

    pool.submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    assert_eq!(pool.pending_requests(), 1);

    // Writing -> Reading, then Reading -> Ok.
    reactor.fire(Token(0));
    reactor.fire(Token(0));

    assert_eq!(pool.pending_requests(), 0);
    assert_eq!(connector.connection(0).unwrap().sent_queries().len(), 1);
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Busy));

    reactor.fire(Token(0));
    assert_eq!(tags(&results), vec![1]);
}

#[test]
fn test_release_dispatches_exactly_one_queued_request() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let results = log();

    let held = pool.acquire(false).unwrap();
    pool.submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    pool.submit_query("SELECT 2", &no_params(), Format::Text, 2, record(&results))
        .unwrap();
    assert_eq!(pool.pending_requests(), 2);

    held.release();
    reactor.run_wakes();

    assert_eq!(pool.pending_requests(), 1);
    let sent = connector.connection(0).unwrap().sent_queries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].query, "SELECT 1");
}

#[test]
fn test_queue_draining_does_not_count_failed_checkouts() {
    let (pool, _connector, reactor) = setup(1, 0);
    establish(&reactor);
    let results = log();

    let held = pool.acquire(false).unwrap();
    for tag in 1..=3 {
        pool.submit_query("SELECT 1", &no_params(), Format::Text, tag, record(&results))
            .unwrap();
    }
    // One failed checkout per queued submission.
    assert_eq!(pool.metrics().checkouts_failed, 3);

    held.release();
    reactor.run_wakes();
    assert_eq!(pool.pending_requests(), 2);

    let metrics = pool.metrics();
    assert_eq!(metrics.checkouts_successful, 2);
    assert_eq!(metrics.checkouts_failed, 3);
}

#[test]
fn test_queue_drains_in_fifo_order() {
    let (pool, connector, reactor) = setup(1, 0);
    let results = log();

    for tag in 1..=5 {
        pool.submit_query(&format!("Q{tag}"), &no_params(), Format::Text, tag, record(&results))
            .unwrap();
    }
    establish(&reactor);

    assert_eq!(tags(&results), vec![1, 2, 3, 4, 5]);
    let order: Vec<String> = connector
        .connection(0)
        .unwrap()
        .sent_queries()
        .into_iter()
        .map(|q| q.query)
        .collect();
    assert_eq!(order, vec!["Q1", "Q2", "Q3", "Q4", "Q5"]);
    assert_eq!(pool.pending_requests(), 0);
}

#[test]
fn test_queue_spreads_over_connections() {
    let (pool, connector, reactor) = setup(3, 0);
    let results = log();

    for tag in 0..6 {
        pool.submit_query("SELECT 1", &no_params(), Format::Text, tag, record(&results))
            .unwrap();
    }
    establish(&reactor);

    assert_eq!(results.lock().len(), 6);
    for control in connector.connections() {
        assert_eq!(control.sent_queries().len(), 2);
    }
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn test_send_failure_returns_error_and_drops_handler() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    connector.connection(0).unwrap().fail_next_send();

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let err = pool
        .submit_query("SELEC 1", &no_params(), Format::Text, (), move |(), _| {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap_err();

    assert!(matches!(err, PoolError::SendFailed(_)));
    establish(&reactor);
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Available));
}

#[test]
fn test_send_failure_of_queued_request_reaches_handler() {
    let (pool, connector, reactor) = setup(1, 0);
    connector.connection(0).unwrap().fail_next_send();
    let results = log();

    pool.submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    pool.submit_query("SELECT 2", &no_params(), Format::Text, 2, record(&results))
        .unwrap();
    establish(&reactor);

    let outcomes = results.lock();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, 1);
    assert!(matches!(outcomes[0].1, Err(PoolError::SendFailed(_))));
    assert_eq!(outcomes[1].0, 2);
    assert!(outcomes[1].1.is_ok());
}

#[test]
fn test_consume_failure_reports_and_resets() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let control = connector.connection(0).unwrap();
    let results = log();

    pool.submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    control.fail_next_consume();
    reactor.fire(Token(0));

    {
        let outcomes = results.lock();
        assert!(matches!(outcomes[0].1, Err(PoolError::ConsumeFailed(_))));
    }
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Connecting));
    assert_eq!(control.reset_count(), 1);

    establish(&reactor);
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Available));
    assert_eq!(control.finish_count(), 0);
}

#[test]
fn test_readiness_error_on_result_keeps_io_source() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let control = connector.connection(0).unwrap();
    let results = log();

    pool.submit_query("SELECT 1", &no_params(), Format::Text, 1, record(&results))
        .unwrap();
    assert!(reactor.fail(Token(0), io::Error::from(io::ErrorKind::ConnectionReset)));

    {
        let outcomes = results.lock();
        assert_eq!(outcomes.len(), 1);
        let err = outcomes[0].1.as_ref().unwrap_err();
        assert_eq!(
            err,
            &PoolError::Reactor(ReactorError::register(
                Token(0),
                io::Error::from(io::ErrorKind::ConnectionReset)
            ))
        );
        assert!(err.source().is_some());
    }
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Connecting));
    assert_eq!(control.reset_count(), 1);
}

#[test]
fn test_invalid_config_never_starts_connections() {
    let connector = MockConnector::new();
    let result = evpg_pool::Pool::new(
        config(2, 3).max_free_connections(1),
        connector.clone(),
        evpg_testing::ManualReactor::new(),
    );
    assert!(matches!(result, Err(PoolError::Config(_))));
    assert_eq!(connector.start_attempts(), 0);
}

// =============================================================================
// Pipelining on a held connection
// =============================================================================

#[test]
fn test_send_query_on_result_connection_keeps_session() {
    let (pool, connector, reactor) = setup(2, 0);
    establish(&reactor);
    let results = log();
    let follow_up = record(&results);

    pool.submit_query("BEGIN", &no_params(), Format::Text, 1, move |tag, result| {
        let mut conn = result.unwrap();
        conn.results();
        let mut params = ParamSet::new();
        params.add(i64::from(tag));
        conn.send_query("INSERT INTO t VALUES ($1)", &params, Format::Text, 2, follow_up)
            .unwrap();
    })
    .unwrap();

    reactor.fire(Token(0));
    assert!(results.lock().is_empty());
    assert_eq!(pool.entry_state(EntryId(0)), Some(EntryState::Busy));

    reactor.fire(Token(0));
    assert_eq!(tags(&results), vec![2]);
    let sent = connector.connection(0).unwrap().sent_queries();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].query, "INSERT INTO t VALUES ($1)");
    assert!(connector.connection(1).unwrap().sent_queries().is_empty());
}

#[test]
fn test_send_query_on_acquired_connection() {
    let (pool, connector, reactor) = setup(1, 0);
    establish(&reactor);
    let results = log();

    let conn = pool.acquire(false).unwrap();
    conn.send_query("SELECT 1", &no_params(), Format::Text, 9, record(&results))
        .unwrap();
    reactor.fire(Token(0));

    assert_eq!(tags(&results), vec![9]);
    assert_eq!(connector.connection(0).unwrap().sent_queries().len(), 1);
}
