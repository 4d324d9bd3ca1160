//! # Sandbox Tests
//!
//! Run against a real Aztec sandbox and need the `aztec` CLI on the PATH:
//! `cargo test -p sandbox-harness --test sandbox_test -- --ignored`

use sandbox_harness::{HarnessConfig, connect_pxe, setup, teardown};
use sandbox_manager::HealthProbe;

#[tokio::test]
#[ignore = "needs the aztec CLI"]
async fn test_real_sandbox_setup_and_teardown() {
    let config = HarnessConfig { verbose: true, ..HarnessConfig::default() };

    let manager = setup(&config).await.expect("sandbox should start");
    let (client, node) = connect_pxe(0, config.sandbox.probe.clone()).await.unwrap();

    assert!(!node.node_version.is_empty());
    assert_eq!(client.node_info().await.unwrap().node_version, node.node_version);

    teardown(Some(&manager)).await;
    assert!(manager.snapshot().is_initial());
}
