#![allow(dead_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

use devstrap::registry::{ProcessRegistry, ServiceSymbol};
use devstrap::supervisor::ProcessSupervisor;
use std::path::PathBuf;

/// Builds a supervisor over a fresh registry rooted at the current directory.
pub fn test_supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(ProcessRegistry::new(), PathBuf::from("."))
}

/// Checks whether a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(pid, None).is_ok()
}

/// Waits until `pid` is gone, panicking after `timeout`.
pub fn wait_until_dead(pid: u32, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while is_process_alive(pid) {
        if Instant::now() >= deadline {
            panic!("process {pid} still alive after {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Spawns a shell command under `symbol` and returns its PID.
pub fn spawn_shell(
    supervisor: &ProcessSupervisor,
    symbol: ServiceSymbol,
    script: &str,
    capture: bool,
) -> u32 {
    supervisor
        .spawn(symbol, "sh", &["-c", script], &[], capture)
        .expect("failed to spawn shell command");
    supervisor
        .registry()
        .pid(symbol)
        .expect("registry lock poisoned")
        .expect("spawned process should be registered")
}
