//! Integration Test: Context Boundaries and Error Propagation
//!
//! **Policy**:
//! - The network client is owned by the relay. Only `relay.rs`, the relay
//!   launcher and the `client` module itself may name it.
//! - Production code propagates errors with `?` instead of panicking through
//!   `unwrap()` or `expect(..)`.

use architectural_enforcement::{find_in_production, report};

/// Files allowed to depend on the network-client capability
const CLIENT_OWNERS: &[&str] = &[
    "bridge/core/src/relay.rs",
    "bridge/core/src/transport/launcher.rs",
    "bridge/core/src/client/",
    "bridge/core/src/lib.rs",
    "bridge/cli/src/",
];

#[test]
fn test_proxy_never_touches_network_client() {
    let violations = find_in_production(|line| {
        let path = line.path.to_string_lossy();
        let owner = CLIENT_OWNERS.iter().any(|owner| path.starts_with(owner));
        !owner && (line.code.contains("crate::client") || line.code.contains("NetworkClient"))
    });

    report(
        "Network client referenced outside the relay context",
        &violations,
        &["The proxy talks to the relay only through Request/Response frames"],
    );
}

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = find_in_production(|line| {
        line.code.contains(".unwrap()") || line.code.contains(".expect(")
    });

    report(
        "Panicking shortcuts in production code",
        &violations,
        &[
            "Return Result and propagate with ?",
            "Use unwrap_or / unwrap_or_else / map_or_else when a fallback exists",
        ],
    );
}

#[test]
fn test_no_std_mutex_in_production_code() {
    let violations = find_in_production(|line| line.code.contains("std::sync::Mutex"));

    report(
        "std::sync::Mutex in production code",
        &violations,
        &["Use parking_lot::Mutex: no poisoning, no unwrap on lock()"],
    );
}
