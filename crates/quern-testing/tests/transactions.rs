//! Transaction integration tests: deferred and blocking commits, the
//! deadlock retry policy, and batch bookkeeping.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use quern_pool::{Completion, DEADLOCK_RETRIES};
use quern_testing::{
    JournalEvent, ScriptHandle, ScriptOptions, ScriptedPool, eventually, init_tracing, script,
};

fn open_pool(handle: &ScriptHandle, async_connections: u8, sync_connections: u8) -> ScriptedPool {
    init_tracing();
    let mut pool = ScriptedPool::new();
    pool.set_connection_info(&handle.connection_string(), async_connections, sync_connections)
        .unwrap();
    pool.open().unwrap();
    pool
}

#[test]
fn test_commit_runs_the_batch_on_a_worker() {
    let handle = script("trans_commit", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    trans.append("UPDATE account SET online = 1 WHERE id = 5");
    trans.append("INSERT INTO account_log VALUES (5, 'login')");
    pool.commit_transaction(trans);

    assert!(eventually(Duration::from_secs(1), || {
        handle.transaction_attempts() == 1
    }));
    assert!(handle.events().into_iter().any(|e| {
        matches!(e, JournalEvent::Transaction { statements: 2, .. })
    }));
}

#[test]
fn test_empty_commit_touches_no_connection() {
    let handle = script("trans_empty", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 1);

    pool.commit_transaction(pool.begin_transaction());
    pool.direct_commit_transaction(pool.begin_transaction());

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.transaction_attempts(), 0);
    assert_eq!(pool.queue_size(), 0);
}

#[test]
fn test_second_commit_of_the_same_batch_is_dropped() {
    let handle = script("trans_double_commit", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    trans.append("DELETE FROM corpse");
    pool.commit_transaction(trans.clone());
    pool.commit_transaction(trans);

    assert!(eventually(Duration::from_secs(1), || {
        handle.transaction_attempts() == 1
    }));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.transaction_attempts(), 1);
}

#[test]
fn test_async_commit_reports_success() {
    let handle = script("trans_async_ok", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    trans.append("INSERT INTO mail VALUES (1)");
    assert_eq!(pool.async_commit_transaction(trans).wait(), Completion::Ready(true));
    assert_eq!(handle.transaction_attempts(), 1);
}

#[test]
fn test_async_commit_reports_failure() {
    let handle = script("trans_async_fail", ScriptOptions::new().reject_commits());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    trans.append("INSERT INTO mail VALUES (1)");
    assert_eq!(pool.async_commit_transaction(trans.clone()).wait(), Completion::Ready(false));
    // The batch was discarded after the terminal failure.
    assert!(trans.is_empty());
}

#[test]
fn test_async_commit_of_empty_batch_resolves_immediately() {
    let handle = script("trans_async_empty", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let callback = pool.async_commit_transaction(pool.begin_transaction());
    assert_eq!(callback.wait(), Completion::Ready(true));
    assert_eq!(handle.transaction_attempts(), 0);
}

#[test]
fn test_async_double_commit_resolves_false() {
    let handle = script("trans_async_double", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    trans.append("UPDATE realms SET population = 0");
    assert_eq!(pool.async_commit_transaction(trans.clone()).wait(), Completion::Ready(true));
    assert_eq!(pool.async_commit_transaction(trans).wait(), Completion::Ready(false));
    assert_eq!(handle.transaction_attempts(), 1);
}

#[test]
fn test_direct_commit_retries_deadlocks_until_success() {
    // The first two attempts deadlock, the third lands.
    let handle = script("trans_deadlock_recovers", ScriptOptions::new().deadlock_first(2));
    let pool = open_pool(&handle, 0, 1);

    let trans = pool.begin_transaction();
    trans.append("UPDATE guild_bank SET gold = gold - 100 WHERE id = 1");
    trans.append("UPDATE guild_bank SET gold = gold + 100 WHERE id = 2");
    pool.direct_commit_transaction(trans.clone());

    assert_eq!(handle.transaction_attempts(), 3);
    // A batch that landed keeps its statements.
    assert_eq!(trans.len(), 2);
}

#[test]
fn test_direct_commit_gives_up_after_bounded_retries() {
    let handle = script("trans_deadlock_exhausted", ScriptOptions::new().deadlock_always());
    let pool = open_pool(&handle, 0, 1);

    let trans = pool.begin_transaction();
    trans.append("UPDATE auction SET bid = 1");
    pool.direct_commit_transaction(trans.clone());

    // One initial attempt plus the bounded retries, then the batch is
    // discarded.
    assert_eq!(handle.transaction_attempts(), 1 + u32::from(DEADLOCK_RETRIES));
    assert!(trans.is_empty());
}

#[test]
fn test_direct_commit_does_not_retry_other_failures() {
    let handle = script("trans_rejected", ScriptOptions::new().reject_commits());
    let pool = open_pool(&handle, 0, 1);

    let trans = pool.begin_transaction();
    trans.append("INSERT INTO broken VALUES (1)");
    pool.direct_commit_transaction(trans.clone());

    assert_eq!(handle.transaction_attempts(), 1);
    assert!(trans.is_empty());
}

#[test]
fn test_execute_or_append_routes_by_transaction_presence() {
    let handle = script("trans_execute_or_append", ScriptOptions::new());
    let pool = open_pool(&handle, 1, 0);

    let trans = pool.begin_transaction();
    pool.execute_or_append(Some(&trans), "UPDATE characters SET map = 0");
    assert_eq!(trans.len(), 1);
    std::thread::sleep(Duration::from_millis(20));
    assert!(handle.executed_sql().is_empty());

    pool.execute_or_append(None, "UPDATE characters SET map = 1");
    assert!(eventually(Duration::from_secs(1), || {
        handle.executed_sql() == ["UPDATE characters SET map = 1"]
    }));
}
