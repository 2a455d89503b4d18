//! Synchronous-side integration tests: connection routing, acquire
//! timeouts, keep-alive and string escaping.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::thread;
use std::time::Duration;

use quern_pool::PoolOptions;
use quern_testing::{
    ScriptHandle, ScriptOptions, ScriptedPool, eventually, init_tracing, script,
};

fn open_pool(handle: &ScriptHandle, async_connections: u8, sync_connections: u8) -> ScriptedPool {
    init_tracing();
    let mut pool = ScriptedPool::new();
    pool.set_connection_info(&handle.connection_string(), async_connections, sync_connections)
        .unwrap();
    pool.open().unwrap();
    pool
}

fn served_by(pool: &ScriptedPool, sql: &str) -> u32 {
    let rows = pool.query(sql).unwrap();
    rows.first().unwrap().get_by_name("connection_id").unwrap()
}

#[test]
fn test_sync_queries_rotate_across_connections() {
    let handle = script("maint_round_robin", ScriptOptions::new());
    let pool = open_pool(&handle, 0, 3);

    let served: Vec<u32> = (0..6).map(|_| served_by(&pool, "SELECT 1")).collect();
    assert_eq!(served, [0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_acquire_timeout_fails_the_call() {
    let handle = script(
        "maint_acquire_timeout",
        ScriptOptions::new().query_delay(Duration::from_millis(300)),
    );
    init_tracing();
    let mut pool = ScriptedPool::with_options(
        PoolOptions::new().sync_acquire_timeout(Duration::from_millis(50)),
    );
    pool.set_connection_info(&handle.connection_string(), 0, 1)
        .unwrap();
    pool.open().unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            // Holds the only synchronous connection for 300ms.
            let _ = pool.query("SELECT pg_sleep");
        });
        thread::sleep(Duration::from_millis(30));
        assert!(pool.query("SELECT 1").is_none());
    });
}

#[test]
#[should_panic(expected = "no synchronous connections")]
fn test_blocking_call_without_sync_connections_panics() {
    let handle = script("maint_no_sync", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);
    let _ = pool.query("SELECT 1");
}

#[test]
fn test_keep_alive_pings_idle_and_async_connections() {
    let handle = script("maint_keep_alive", ScriptOptions::new());
    let pool = open_pool(&handle, 2, 2);

    pool.keep_alive();
    // Two synchronous pings happen inline; the two asynchronous ones go
    // through the queue.
    assert!(eventually(Duration::from_secs(1), || handle.ping_count() == 4));
}

#[test]
fn test_keep_alive_skips_busy_sync_connections() {
    let handle = script(
        "maint_keep_alive_busy",
        ScriptOptions::new().query_delay(Duration::from_millis(200)),
    );
    let pool = open_pool(&handle, 0, 1);

    thread::scope(|s| {
        s.spawn(|| {
            let _ = pool.query("SELECT long_running");
        });
        thread::sleep(Duration::from_millis(30));
        pool.keep_alive();
        assert_eq!(handle.ping_count(), 0);
    });
}

#[test]
fn test_escape_string_rewrites_in_place() {
    let handle = script("maint_escape", ScriptOptions::new());
    let pool = open_pool(&handle, 0, 1);

    let mut name = String::from("O'Neill");
    pool.escape_string(&mut name);
    assert_eq!(name, "O''Neill");
    assert_eq!(handle.escape_count(), 1);

    // An empty buffer never reaches a connection.
    let mut empty = String::new();
    pool.escape_string(&mut empty);
    assert!(empty.is_empty());
    assert_eq!(handle.escape_count(), 1);
}

#[test]
fn test_queue_size_reports_and_drains_backlog() {
    let handle = script(
        "maint_queue_size",
        ScriptOptions::new().query_delay(Duration::from_millis(50)),
    );
    let pool = open_pool(&handle, 1, 0);

    let first = pool.async_query("SELECT 1");
    let second = pool.async_query("SELECT 2");
    let third = pool.async_query("SELECT 3");

    assert!(eventually(Duration::from_secs(2), || {
        pool.queue_size() == 0 && handle.queried_sql().len() == 3
    }));
    drop((first, second, third));
}
