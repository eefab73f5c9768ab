//! Registry of managed child processes, keyed by service symbol.

use std::{
    collections::HashMap,
    process::{Child, ExitStatus},
    sync::{Arc, Mutex, mpsc::Receiver},
};

use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::OrchestratorError;

/// Logical identity of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceSymbol {
    /// The backend application server.
    Backend,
    /// The auxiliary image-processing service.
    ImageService,
    /// The front-end dev server.
    Frontend,
}

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process has been registered under the symbol.
    NotStarted,
    /// The child is live.
    Running,
    /// A termination request has been issued.
    Terminating,
    /// The child has exited and been reaped.
    Terminated,
}

/// A child process owned by the registry for its lifetime.
#[derive(Debug)]
pub struct ManagedProcess {
    /// Live OS handle; taken when the process is reaped.
    pub child: Option<Child>,
    /// Captured stdout lines, present when spawned with output capture.
    /// Taken exactly once by the readiness watcher gating this process.
    pub output: Option<Receiver<String>>,
    /// Current lifecycle state.
    pub state: ProcessState,
}

/// Shared, mutex-guarded map from symbol to managed process.
///
/// The supervisor is the only writer; the shutdown coordinator and readiness
/// watcher read through the same handle.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<ServiceSymbol, ManagedProcess>>>,
}

impl ProcessRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly spawned child under `symbol`, replacing any
    /// terminated predecessor.
    pub fn register(
        &self,
        symbol: ServiceSymbol,
        child: Child,
        output: Option<Receiver<String>>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock()?;
        inner.insert(
            symbol,
            ManagedProcess {
                child: Some(child),
                output,
                state: ProcessState::Running,
            },
        );
        Ok(())
    }

    /// Returns the lifecycle state recorded for `symbol`.
    pub fn state(&self, symbol: ServiceSymbol) -> Result<ProcessState, OrchestratorError> {
        let inner = self.inner.lock()?;
        Ok(inner
            .get(&symbol)
            .map(|p| p.state)
            .unwrap_or(ProcessState::NotStarted))
    }

    /// Records a state transition for `symbol`. No-op for unknown symbols.
    pub fn set_state(
        &self,
        symbol: ServiceSymbol,
        state: ProcessState,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock()?;
        if let Some(process) = inner.get_mut(&symbol) {
            process.state = state;
        }
        Ok(())
    }

    /// PID of the live child registered under `symbol`, if any.
    pub fn pid(&self, symbol: ServiceSymbol) -> Result<Option<u32>, OrchestratorError> {
        let inner = self.inner.lock()?;
        Ok(inner
            .get(&symbol)
            .filter(|p| p.state == ProcessState::Running)
            .and_then(|p| p.child.as_ref())
            .map(|child| child.id()))
    }

    /// Takes the captured-output channel for `symbol`, leaving the process
    /// registered. Each spawn's output can be consumed by exactly one reader.
    pub fn take_output(
        &self,
        symbol: ServiceSymbol,
    ) -> Result<Option<Receiver<String>>, OrchestratorError> {
        let mut inner = self.inner.lock()?;
        Ok(inner.get_mut(&symbol).and_then(|p| p.output.take()))
    }

    /// Non-blocking exit check for the child registered under `symbol`.
    ///
    /// Returns `Ok(Some(status))` once the child has exited; the handle is
    /// reaped and the state moves to `Terminated`.
    pub fn try_wait(
        &self,
        symbol: ServiceSymbol,
    ) -> Result<Option<ExitStatus>, OrchestratorError> {
        let mut inner = self.inner.lock()?;
        let Some(process) = inner.get_mut(&symbol) else {
            return Ok(None);
        };
        let Some(child) = process.child.as_mut() else {
            return Ok(None);
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                process.child = None;
                process.state = ProcessState::Terminated;
                Ok(Some(status))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OrchestratorError::StopError {
                service: symbol.to_string(),
                source: e,
            }),
        }
    }

    /// Takes the child handle out of the registry slot so it can be reaped
    /// outside the lock. The slot and its recorded state remain.
    pub fn take_child(
        &self,
        symbol: ServiceSymbol,
    ) -> Result<Option<Child>, OrchestratorError> {
        let mut inner = self.inner.lock()?;
        Ok(inner.get_mut(&symbol).and_then(|p| p.child.take()))
    }

    /// Removes the registry slot for `symbol` entirely.
    pub fn unregister(&self, symbol: ServiceSymbol) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock()?;
        inner.remove(&symbol);
        Ok(())
    }

    /// Symbols currently holding a live process.
    pub fn running_symbols(&self) -> Result<Vec<ServiceSymbol>, OrchestratorError> {
        let inner = self.inner.lock()?;
        Ok(inner
            .iter()
            .filter(|(_, p)| p.state == ProcessState::Running)
            .map(|(symbol, _)| *symbol)
            .collect())
    }
}
