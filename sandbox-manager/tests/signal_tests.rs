mod helpers;

use helpers::*;
use sandbox_manager::{SandboxConfig, ShutdownSignal, SignalCoordinator, process::Control};
use tokio::time::Duration;

fn registered(
    launcher: &FakeLauncher,
    probe: &FakeProbe,
    coordinator: &SignalCoordinator,
) -> FakeManager {
    fake_manager_with(SandboxConfig::default(), launcher, probe, coordinator.clone())
}

fn ready_pair() -> (FakeLauncher, FakeProbe) {
    (
        FakeLauncher::new(Script::Run { ignore_terminate: false }),
        FakeProbe::new(Health::ReadyAfter(Duration::from_millis(50))),
    )
}

/// A shutdown signal stops the running manager and terminates its process
#[tokio::test(start_paused = true)]
async fn test_trigger_stops_running_manager() {
    let coordinator = SignalCoordinator::new();
    let (launcher, probe) = ready_pair();
    let manager = registered(&launcher, &probe, &coordinator);
    manager.start().await.unwrap();

    assert!(coordinator.trigger(ShutdownSignal::Interrupt).await);

    assert!(manager.snapshot().is_initial());
    assert_eq!(launcher.controls(), vec![Control::Terminate]);
    assert!(!coordinator.has_active());
}

/// Registration follows the manager's lifecycle
#[tokio::test(start_paused = true)]
async fn test_registration_cleared_on_stop_and_restored_on_start() {
    let coordinator = SignalCoordinator::new();
    let (launcher, probe) = ready_pair();
    let manager = registered(&launcher, &probe, &coordinator);
    assert!(manager.is_registered(), "a new manager registers itself");

    manager.start().await.unwrap();
    manager.stop().await;
    assert!(!manager.is_registered());
    assert!(!coordinator.has_active());

    manager.start().await.unwrap();
    assert!(manager.is_registered());
}

/// Only the most recently built manager is stopped by a signal
#[tokio::test(start_paused = true)]
async fn test_newer_manager_replaces_registration() {
    let coordinator = SignalCoordinator::new();
    let (first_launcher, first_probe) = ready_pair();
    let (second_launcher, second_probe) = ready_pair();
    let first = registered(&first_launcher, &first_probe, &coordinator);
    first.start().await.unwrap();
    let second = registered(&second_launcher, &second_probe, &coordinator);

    assert!(!first.is_registered());
    assert!(second.is_registered());

    assert!(coordinator.trigger(ShutdownSignal::Terminate).await);
    settle().await;

    assert!(first.is_ready(), "the replaced manager keeps running");
    assert!(first_launcher.controls().is_empty());
    assert!(second.snapshot().is_initial());
}

/// A failed start clears the registration
#[tokio::test(start_paused = true)]
async fn test_failed_start_clears_registration() {
    let coordinator = SignalCoordinator::new();
    let launcher = FakeLauncher::new(Script::Run { ignore_terminate: false });
    let probe = FakeProbe::new(Health::FailAfter(Duration::from_millis(10)));
    let manager = registered(&launcher, &probe, &coordinator);

    assert!(manager.start().await.is_err());

    assert!(!manager.is_registered());
    assert!(!coordinator.trigger(ShutdownSignal::Interrupt).await);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_manager_is_not_triggered() {
    let coordinator = SignalCoordinator::new();
    let (launcher, probe) = ready_pair();
    let manager = registered(&launcher, &probe, &coordinator);
    drop(manager);

    assert!(!coordinator.has_active());
    assert!(!coordinator.trigger(ShutdownSignal::Interrupt).await);
}
