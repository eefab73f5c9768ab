#[path = "common/mod.rs"]
mod common;

use std::{
    sync::atomic::AtomicBool,
    time::{Duration, Instant},
};

use common::{spawn_shell, test_supervisor};
use devstrap::{
    error::OrchestratorError,
    readiness::{ReadinessCondition, wait_for_marker},
    registry::ServiceSymbol,
};

#[test]
fn detects_marker_from_live_process_output() {
    let supervisor = test_supervisor();
    spawn_shell(
        &supervisor,
        ServiceSymbol::Backend,
        "echo 'compiling...'; echo 'The development server is now running at x'; sleep 30",
        true,
    );

    let condition = ReadinessCondition::new(
        "The development server is now running at",
        Duration::from_secs(10),
    );
    let started = Instant::now();
    wait_for_marker(
        supervisor.registry(),
        ServiceSymbol::Backend,
        &condition,
        &AtomicBool::new(false),
    )
    .unwrap();

    // success came from the marker line, not from stream end or exit
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(supervisor.is_running(ServiceSymbol::Backend));

    supervisor
        .terminate(ServiceSymbol::Backend, Duration::from_secs(2))
        .unwrap();
}

#[test]
fn silent_process_times_out_instead_of_blocking() {
    let supervisor = test_supervisor();
    spawn_shell(&supervisor, ServiceSymbol::ImageService, "sleep 30", true);

    let condition = ReadinessCondition::new("ready", Duration::from_millis(400));
    let started = Instant::now();
    let err = wait_for_marker(
        supervisor.registry(),
        ServiceSymbol::ImageService,
        &condition,
        &AtomicBool::new(false),
    )
    .unwrap_err();

    assert!(matches!(err, OrchestratorError::ReadinessTimeout { .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_secs(3));

    supervisor
        .terminate(ServiceSymbol::ImageService, Duration::from_secs(2))
        .unwrap();
}

#[test]
fn early_exit_is_reported_as_process_exited() {
    let supervisor = test_supervisor();
    spawn_shell(
        &supervisor,
        ServiceSymbol::Frontend,
        "echo 'crashing during startup'; exit 3",
        true,
    );

    let condition = ReadinessCondition::new("Ready in", Duration::from_secs(10));
    let err = wait_for_marker(
        supervisor.registry(),
        ServiceSymbol::Frontend,
        &condition,
        &AtomicBool::new(false),
    )
    .unwrap_err();

    assert!(matches!(err, OrchestratorError::ProcessExited { .. }));
}

#[test]
fn spawning_without_capture_cannot_be_marker_gated() {
    let supervisor = test_supervisor();
    spawn_shell(&supervisor, ServiceSymbol::Backend, "sleep 30", false);

    let condition = ReadinessCondition::new("ready", Duration::from_secs(1));
    let err = wait_for_marker(
        supervisor.registry(),
        ServiceSymbol::Backend,
        &condition,
        &AtomicBool::new(false),
    )
    .unwrap_err();

    assert!(matches!(err, OrchestratorError::ProcessExited { .. }));

    supervisor
        .terminate(ServiceSymbol::Backend, Duration::from_secs(2))
        .unwrap();
}
