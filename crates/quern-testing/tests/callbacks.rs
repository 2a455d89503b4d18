//! Callback integration tests: processing deferred results on a consumer
//! thread, chaining dependent queries, and cancellation behavior.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use quern_pool::{CallbackProcessor, Completion, QueryHolder};
use quern_testing::{ScriptHandle, ScriptOptions, ScriptedPool, init_tracing, script};

fn open_pool(handle: &ScriptHandle, async_connections: u8, sync_connections: u8) -> ScriptedPool {
    init_tracing();
    let mut pool = ScriptedPool::new();
    pool.set_connection_info(&handle.connection_string(), async_connections, sync_connections)
        .unwrap();
    pool.open().unwrap();
    pool
}

/// Pump `processor` until it drains or `timeout` elapses.
fn pump<C: quern_pool::AsyncCallback>(processor: &mut CallbackProcessor<C>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !processor.is_empty() {
        processor.process_ready();
        assert!(Instant::now() < deadline, "callbacks never completed");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_processor_runs_continuations_on_the_polling_thread() {
    let handle = script("cb_processor", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let consumer = std::thread::current().id();
    let hit = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&hit);

    let mut processor = CallbackProcessor::new();
    processor.add_callback(pool.async_query("SELECT realm FROM realms").then(move |result| {
        assert_eq!(std::thread::current().id(), consumer);
        assert!(result.is_some());
        observer.store(true, Ordering::SeqCst);
    }));

    pump(&mut processor, Duration::from_secs(1));
    assert!(hit.load(Ordering::SeqCst));
}

#[test]
fn test_chained_queries_run_in_submission_order() {
    let handle = script("cb_chain", ScriptOptions::new());
    let pool = Arc::new(open_pool(&handle, 1, 0));

    let stage = Arc::new(AtomicU32::new(0));
    let mut processor = CallbackProcessor::new();
    {
        let chain_pool = Arc::clone(&pool);
        let first_stage = Arc::clone(&stage);
        let last_stage = Arc::clone(&stage);
        processor.add_callback(
            pool.async_query("SELECT guid FROM characters WHERE account = 7")
                .and_then(move |result| {
                    let rows = result.unwrap();
                    let served: u32 = rows.first().unwrap().get_by_name("connection_id").unwrap();
                    assert_eq!(served, 0);
                    first_stage.store(1, Ordering::SeqCst);
                    chain_pool.async_query("SELECT name FROM characters WHERE guid = 42")
                })
                .then(move |result| {
                    let rows = result.unwrap();
                    let echoed: String = rows.first().unwrap().get_by_name("echo").unwrap();
                    assert_eq!(echoed, "SELECT name FROM characters WHERE guid = 42");
                    last_stage.store(2, Ordering::SeqCst);
                }),
        );
    }

    pump(&mut processor, Duration::from_secs(1));
    assert_eq!(stage.load(Ordering::SeqCst), 2);
    assert_eq!(
        handle.queried_sql(),
        [
            "SELECT guid FROM characters WHERE account = 7",
            "SELECT name FROM characters WHERE guid = 42",
        ]
    );
}

#[test]
fn test_waiting_drives_a_chain_to_completion() {
    let handle = script("cb_chain_wait", ScriptOptions::new());
    let pool = Arc::new(open_pool(&handle, 1, 0));

    let chain_pool = Arc::clone(&pool);
    let completion = pool
        .async_query("SELECT 1")
        .and_then(move |_| chain_pool.async_query("SELECT 2"))
        .wait();

    let Completion::Ready(Some(rows)) = completion else {
        panic!("expected the second query's rows, got {completion:?}");
    };
    assert_eq!(rows.first().unwrap().get_by_name::<String>("echo").unwrap(), "SELECT 2");
}

#[test]
fn test_transaction_callback_reports_through_processor() {
    let handle = script("cb_transaction", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let outcome = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&outcome);

    let trans = pool.begin_transaction();
    trans.append("INSERT INTO mail_items VALUES (1, 2)");

    let mut processor = CallbackProcessor::new();
    processor.add_callback(
        pool.async_commit_transaction(trans)
            .after_complete(move |ok| observer.store(ok, Ordering::SeqCst)),
    );

    pump(&mut processor, Duration::from_secs(1));
    assert!(outcome.load(Ordering::SeqCst));
}

#[test]
fn test_holder_callback_hands_over_filled_holder() {
    let handle = script("cb_holder", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let seen = Arc::new(AtomicU32::new(0));
    let observer = Arc::clone(&seen);

    let mut holder = QueryHolder::new(2);
    holder.set_query(0, "SELECT a");
    holder.set_query(1, "SELECT b");

    let mut processor = CallbackProcessor::new();
    processor.add_callback(pool.delay_query_holder(holder).after_complete(move |mut holder| {
        let mut filled = 0;
        for slot in 0..holder.slot_count() {
            if holder.result(slot).is_some() {
                filled += 1;
            }
        }
        observer.store(filled, Ordering::SeqCst);
    }));

    pump(&mut processor, Duration::from_secs(1));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cancelled_callbacks_complete_without_running_continuations() {
    // Park the worker on a slow query so the second one is still queued
    // when the pool closes.
    let handle = script(
        "cb_cancelled",
        ScriptOptions::new().query_delay(Duration::from_millis(50)),
    );
    let mut pool = open_pool(&handle, 1, 0);

    let ran = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&ran);

    let parked = pool.async_query("SELECT slow");
    let doomed = pool
        .async_query("SELECT never")
        .then(move |_| observer.store(true, Ordering::SeqCst));
    pool.close();

    let mut processor = CallbackProcessor::new();
    processor.add_callback(doomed);
    assert_eq!(processor.process_ready(), 1);
    assert!(!ran.load(Ordering::SeqCst));
    drop(parked);
}
