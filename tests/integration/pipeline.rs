#[path = "common/mod.rs"]
mod common;

use std::{
    env, fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::atomic::AtomicBool,
    time::Duration,
};

use common::{is_process_alive, spawn_shell, test_supervisor};
use devstrap::{
    error::OrchestratorError,
    pipeline::{PipelineResult, Task, TaskPipeline},
    readiness::{ReadinessCondition, wait_for_marker},
    registry::{ProcessRegistry, ProcessState, ServiceSymbol},
    shutdown::ShutdownCoordinator,
    supervisor::ProcessSupervisor,
};

struct Ctx {
    supervisor: ProcessSupervisor,
    ran: Vec<&'static str>,
}

fn fail(command: &'static str) -> OrchestratorError {
    OrchestratorError::CommandFailed {
        command: command.into(),
        code: Some(1),
    }
}

#[test]
fn abort_tears_down_processes_started_by_earlier_tasks() {
    let supervisor = test_supervisor();
    let shutdown = ShutdownCoordinator::new(
        supervisor.clone(),
        std::env::temp_dir().join("devstrap-no-cluster"),
    )
    .with_grace(Duration::from_secs(2));

    let mut ctx = Ctx {
        supervisor,
        ran: Vec::new(),
    };

    let pipeline = TaskPipeline::new(vec![
        Task::new("start-backend", |ctx: &mut Ctx| {
            ctx.ran.push("start-backend");
            spawn_shell(&ctx.supervisor, ServiceSymbol::Backend, "sleep 30", false);
            Ok(())
        }),
        Task::new("start-frontend", |ctx: &mut Ctx| {
            ctx.ran.push("start-frontend");
            spawn_shell(&ctx.supervisor, ServiceSymbol::Frontend, "sleep 30", false);
            Ok(())
        }),
        Task::new("broken-step", |ctx: &mut Ctx| {
            ctx.ran.push("broken-step");
            Err(fail("broken-step"))
        }),
        Task::new("never-reached", |ctx: &mut Ctx| {
            ctx.ran.push("never-reached");
            Ok(())
        }),
    ]);

    let result = pipeline.run(&mut ctx, &shutdown);

    assert_eq!(result, PipelineResult::Aborted { at: "broken-step" });
    assert_eq!(ctx.ran, vec!["start-backend", "start-frontend", "broken-step"]);

    // the abort funneled into shutdown: both services were terminated
    assert!(shutdown.has_run());
    assert!(!ctx.supervisor.is_running(ServiceSymbol::Backend));
    assert!(!ctx.supervisor.is_running(ServiceSymbol::Frontend));
    assert_eq!(
        ctx.supervisor.registry().state(ServiceSymbol::Backend).unwrap(),
        ProcessState::Terminated
    );
    assert_eq!(
        ctx.supervisor.registry().state(ServiceSymbol::Frontend).unwrap(),
        ProcessState::Terminated
    );

    // re-running shutdown has no further effect
    assert!(!shutdown.run_once());
}

#[test]
fn completed_pipeline_leaves_shutdown_to_the_caller() {
    let supervisor = test_supervisor();
    let shutdown = ShutdownCoordinator::new(
        supervisor.clone(),
        std::env::temp_dir().join("devstrap-no-cluster"),
    )
    .with_grace(Duration::from_secs(2));

    let mut ctx = Ctx {
        supervisor,
        ran: Vec::new(),
    };

    let result = TaskPipeline::new(vec![Task::new("start-backend", |ctx: &mut Ctx| {
        spawn_shell(&ctx.supervisor, ServiceSymbol::Backend, "sleep 30", false);
        Ok(())
    })])
    .run(&mut ctx, &shutdown);

    assert_eq!(result, PipelineResult::Completed);
    assert!(!shutdown.has_run());
    assert!(ctx.supervisor.is_running(ServiceSymbol::Backend));

    // the caller-side teardown stops everything exactly once
    let pid = ctx
        .supervisor
        .registry()
        .pid(ServiceSymbol::Backend)
        .unwrap()
        .unwrap();
    assert!(shutdown.run_once());
    assert!(!is_process_alive(pid));
}

#[test]
fn teardown_stops_dependents_before_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let order_log = dir.path().join("order.log");
    let supervisor = test_supervisor();

    // each child records its name when the SIGTERM lands, so the log file
    // is the observed teardown order
    for (symbol, name) in [
        (ServiceSymbol::Backend, "backend"),
        (ServiceSymbol::ImageService, "image-service"),
        (ServiceSymbol::Frontend, "frontend"),
    ] {
        let script = format!(
            "trap 'echo {name} >> \"{log}\"; exit 0' TERM; echo {name}-armed; \
             while true; do sleep 0.2; done",
            log = order_log.display()
        );
        spawn_shell(&supervisor, symbol, &script, true);
        wait_for_marker(
            supervisor.registry(),
            symbol,
            &ReadinessCondition::new(format!("{name}-armed"), Duration::from_secs(5)),
            &AtomicBool::new(false),
        )
        .unwrap();
    }

    let shutdown =
        ShutdownCoordinator::new(supervisor, dir.path().join("no-cluster"))
            .with_grace(Duration::from_secs(3));
    assert!(shutdown.run_once());

    let recorded = fs::read_to_string(&order_log).unwrap();
    assert_eq!(
        recorded.lines().collect::<Vec<_>>(),
        vec!["frontend", "image-service", "backend"]
    );
}

#[test]
fn database_stop_is_issued_from_the_orchestrator_directory() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = dir.path().join("built/database-cluster");
    fs::create_dir_all(&cluster).unwrap();
    fs::write(cluster.join("postmaster.pid"), "1234\n").unwrap();

    // a stand-in pg_ctl records its cwd, the -D argument, and whether that
    // directory is visible from where the command was launched
    let stub_dir = dir.path().join("bin");
    fs::create_dir_all(&stub_dir).unwrap();
    let call_log = dir.path().join("pg_ctl.log");
    let stub = stub_dir.join("pg_ctl");
    fs::write(
        &stub,
        format!(
            "#!/bin/sh\npwd > \"{log}\"\nprintf '%s\\n' \"$3\" >> \"{log}\"\n\
             [ -d \"$3\" ] && echo dir-visible >> \"{log}\"\n",
            log = call_log.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();

    let path_var = env::var_os("PATH").unwrap_or_default();
    let prepended = env::join_paths(
        std::iter::once(stub_dir).chain(env::split_paths(&path_var)),
    )
    .unwrap();
    unsafe {
        env::set_var("PATH", &prepended);
    }

    let supervisor =
        ProcessSupervisor::new(ProcessRegistry::new(), dir.path().to_path_buf());
    let shutdown = ShutdownCoordinator::new(supervisor, cluster.clone());
    assert!(shutdown.run_once());

    let recorded = fs::read_to_string(&call_log).unwrap();
    let mut lines = recorded.lines();
    // the command ran from the orchestrator's cwd, not from the cluster dir
    let cwd = Path::new(lines.next().unwrap()).canonicalize().unwrap();
    assert_eq!(cwd, env::current_dir().unwrap().canonicalize().unwrap());
    // -D was absolute and resolvable from that cwd
    let data_dir = Path::new(lines.next().unwrap()).to_path_buf();
    assert!(data_dir.is_absolute());
    assert!(data_dir.ends_with("built/database-cluster"));
    assert_eq!(lines.next(), Some("dir-visible"));
}
