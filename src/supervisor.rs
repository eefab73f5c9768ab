//! Spawning and terminating managed service processes.

use std::{
    env,
    io::{BufRead, BufReader},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::mpsc::{self, Receiver},
    thread,
    time::Duration,
};

use tracing::{debug, error, warn};

use crate::{
    constants::TERMINATION_POLL_INTERVAL,
    error::OrchestratorError,
    registry::{ProcessRegistry, ProcessState, ServiceSymbol},
};

/// Spawns external commands as managed children and performs
/// graceful-then-forced termination against the shared registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    registry: ProcessRegistry,
    working_dir: PathBuf,
}

impl ProcessSupervisor {
    /// Creates a supervisor operating on `registry`, resolving relative
    /// commands against `working_dir`.
    pub fn new(registry: ProcessRegistry, working_dir: PathBuf) -> Self {
        Self {
            registry,
            working_dir,
        }
    }

    /// The registry this supervisor mutates.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Launches `program` as a managed child registered under `symbol`.
    ///
    /// The child is placed in its own process group so its whole tree can be
    /// signalled without touching the orchestrator's group. With
    /// `capture_output`, a reader thread forwards stdout lines into a channel
    /// held by the registry slot for the readiness watcher.
    pub fn spawn(
        &self,
        symbol: ServiceSymbol,
        program: &str,
        args: &[&str],
        env: &[(&str, String)],
        capture_output: bool,
    ) -> Result<(), OrchestratorError> {
        debug!("Spawning '{symbol}': `{program} {}`", args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(&self.working_dir);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if capture_output {
            cmd.stdout(Stdio::piped());
        }

        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn service '{symbol}': {e}");
            OrchestratorError::SpawnError {
                service: symbol.to_string(),
                source: e,
            }
        })?;

        debug!("Service '{symbol}' started with PID {}", child.id());

        let output = if capture_output {
            child.stdout.take().map(|stdout| spawn_line_reader(symbol, stdout))
        } else {
            None
        };

        self.registry.register(symbol, child, output)
    }

    /// Non-blocking liveness check for `symbol`.
    ///
    /// Reaps the child if it has already exited, so a dead-but-unreaped
    /// process is never reported as running.
    pub fn is_running(&self, symbol: ServiceSymbol) -> bool {
        match self.registry.try_wait(symbol) {
            Ok(Some(_)) => false,
            Ok(None) => matches!(self.registry.pid(symbol), Ok(Some(_))),
            Err(_) => false,
        }
    }

    /// Gracefully terminates the process registered under `symbol`, waiting
    /// up to `grace` before force-killing it. No-op if the symbol holds no
    /// live process.
    pub fn terminate(
        &self,
        symbol: ServiceSymbol,
        grace: Duration,
    ) -> Result<(), OrchestratorError> {
        let Some(raw_pid) = self.registry.pid(symbol)? else {
            debug!("Service '{symbol}' has no live process to terminate");
            return Ok(());
        };

        self.registry.set_state(symbol, ProcessState::Terminating)?;
        let pid = nix::unistd::Pid::from_raw(raw_pid as i32);

        let mut process_running = match nix::sys::signal::kill(pid, None) {
            Ok(_) => true,
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Service '{symbol}' no longer has a live process");
                false
            }
            Err(err) => {
                return Err(OrchestratorError::StopError {
                    service: symbol.to_string(),
                    source: nix_error_to_io(err),
                });
            }
        };

        if process_running {
            signal_group_or_process(symbol, pid, raw_pid)?;

            // Poll through the registry so the exited child is reaped; a
            // zombie would still answer a bare signal-0 probe.
            let checks = (grace.as_millis() / TERMINATION_POLL_INTERVAL.as_millis()).max(1);
            for _ in 0..checks {
                thread::sleep(TERMINATION_POLL_INTERVAL);
                if self.registry.try_wait(symbol)?.is_some() {
                    process_running = false;
                    break;
                }
            }

            if process_running {
                warn!("Service '{symbol}' did not exit after SIGTERM; sending SIGKILL");
                if let Err(kill_err) =
                    nix::sys::signal::kill(pid, Some(nix::sys::signal::SIGKILL))
                    && kill_err != nix::errno::Errno::ESRCH
                {
                    return Err(OrchestratorError::StopError {
                        service: symbol.to_string(),
                        source: nix_error_to_io(kill_err),
                    });
                }
            }
        }

        // Reap the handle outside the registry lock, then record the final state.
        if let Some(mut child) = self.registry.take_child(symbol)? {
            let _ = child.wait();
        }
        self.registry.set_state(symbol, ProcessState::Terminated)?;
        debug!("Service '{symbol}' stopped");
        Ok(())
    }
}

/// Sends SIGTERM to the child's process group when it has one of its own,
/// falling back to a direct signal.
fn signal_group_or_process(
    symbol: ServiceSymbol,
    pid: nix::unistd::Pid,
    raw_pid: u32,
) -> Result<(), OrchestratorError> {
    let supervisor_pgid = unsafe { libc::getpgid(0) };
    let child_pgid = unsafe { libc::getpgid(raw_pid as i32) };

    if child_pgid >= 0 && child_pgid != supervisor_pgid {
        let kill_result = unsafe { libc::killpg(child_pgid, libc::SIGTERM) };
        if kill_result < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::ESRCH || code == libc::EPERM => {
                    warn!(
                        "Could not signal process group {child_pgid} for '{symbol}'; \
                         falling back to direct signal"
                    );
                }
                _ => {
                    return Err(OrchestratorError::StopError {
                        service: symbol.to_string(),
                        source: err,
                    });
                }
            }
        } else {
            debug!("Sent SIGTERM to process group {child_pgid} for service '{symbol}'");
            return Ok(());
        }
    }

    if let Err(kill_err) = nix::sys::signal::kill(pid, Some(nix::sys::signal::SIGTERM))
        && kill_err != nix::errno::Errno::ESRCH
    {
        return Err(OrchestratorError::StopError {
            service: symbol.to_string(),
            source: nix_error_to_io(kill_err),
        });
    }

    Ok(())
}

fn nix_error_to_io(err: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(err as i32)
}

/// Spawns a thread that forwards each stdout line of a child into a channel.
/// The channel disconnects when the child closes its stdout.
fn spawn_line_reader(
    symbol: ServiceSymbol,
    stdout: std::process::ChildStdout,
) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        let mut forwarding = true;
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    // Once the watcher is gone, keep draining so the child
                    // never blocks on a full pipe.
                    if forwarding && tx.send(line).is_err() {
                        forwarding = false;
                    }
                }
                Err(err) => {
                    debug!("Stopped reading stdout of '{symbol}': {err}");
                    break;
                }
            }
        }
    });
    rx
}

/// Runs an external command to completion, failing on a nonzero status.
pub fn run_command(
    working_dir: &Path,
    program: &str,
    args: &[&str],
) -> Result<(), OrchestratorError> {
    let rendered = render_command(program, args);
    debug!("Running `{rendered}`");

    let status = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .status()
        .map_err(|e| command_launch_error(&rendered, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(OrchestratorError::CommandFailed {
            command: rendered,
            code: status.code(),
        })
    }
}

/// Runs an external command to completion and returns its trimmed stdout.
pub fn run_command_capture(
    working_dir: &Path,
    program: &str,
    args: &[&str],
) -> Result<String, OrchestratorError> {
    let rendered = render_command(program, args);
    debug!("Running `{rendered}`");

    let output = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stderr(Stdio::null())
        .output()
        .map_err(|e| command_launch_error(&rendered, e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(OrchestratorError::CommandFailed {
            command: rendered,
            code: output.status.code(),
        })
    }
}

/// Runs an external command and reports only its exit code, treating launch
/// failures as errors. Used by probes that encode state in the exit status.
pub fn run_command_status(
    working_dir: &Path,
    program: &str,
    args: &[&str],
) -> Result<Option<i32>, OrchestratorError> {
    let rendered = render_command(program, args);
    let status = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| command_launch_error(&rendered, e))?;
    Ok(status.code())
}

/// Locates `executable` on `PATH`, returning its full path.
pub fn locate_executable(executable: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for entry in env::split_paths(&path_var) {
        let candidate = entry.join(executable);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

fn command_launch_error(command: &str, err: std::io::Error) -> OrchestratorError {
    error!("Failed to launch `{command}`: {err}");
    OrchestratorError::CommandFailed {
        command: command.to_string(),
        code: None,
    }
}
