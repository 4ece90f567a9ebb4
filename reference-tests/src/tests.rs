//! Reference test integration tests
//!
//! These tests run the full reference suite via cargo test.

use std::path::{Path, PathBuf};

use crate::cases::{outlet_relay_test, periodic_channel_test, rebound_box_test};

/// Configuration directory at the workspace root
fn config_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("Could not find workspace root")
        .join("configs")
}

#[test]
fn test_periodic_channel() {
    let test = periodic_channel_test(&config_dir());
    let result = test.run().expect("Test execution failed");
    result.print_summary();
    assert!(result.report.sent > 0, "no particle crossed between ranks");
    assert!(result.passed, "Periodic channel test failed");
}

#[test]
fn test_rebound_box() {
    let test = rebound_box_test(&config_dir());
    let result = test.run().expect("Test execution failed");
    result.print_summary();
    assert_eq!(result.final_count, result.initial_count);
    assert!(result.passed, "Rebound box test failed");
}

#[test]
fn test_outlet_relay() {
    let test = outlet_relay_test(&config_dir());
    let result = test.run().expect("Test execution failed");
    result.print_summary();
    assert!(result.report.escaped > 0, "nothing reached the outlet");
    assert_eq!(result.report.lost, 0);
    assert!(result.report.rounds > 2, "no particle crossed two ranks in one step");
    assert!(result.passed, "Outlet relay test failed");
}
