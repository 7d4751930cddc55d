//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Library and binary code MUST NOT sleep. The heartbeat runs on
//! `tokio::time::interval`, the relay waits on its channel, and the CLI
//! waits on listener events with `tokio::time::timeout`.
//! **Exceptions**: test code (`#[cfg(test)]` modules and `tests/` directories).

use architectural_enforcement::{find_in_production, report};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_in_production(|line| {
        line.code.contains("::sleep(") || line.code.contains(".sleep(")
    });

    report(
        "Sleep calls found in production code",
        &violations,
        &[
            "Periodic work: tokio::time::interval",
            "Waiting for an event: a channel receive, optionally under tokio::time::timeout",
            "Test pacing belongs in #[cfg(test)] modules or tests/",
        ],
    );
}

#[test]
fn test_no_blocking_thread_sleep_anywhere_in_async_code() {
    let violations = find_in_production(|line| line.code.contains("std::thread::sleep"));

    report(
        "Blocking thread sleep in production code",
        &violations,
        &["A blocked worker thread stalls every task scheduled on it"],
    );
}
