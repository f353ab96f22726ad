//! # What a running unit receives.
//!
//! [`UnitContext`] is handed to [`Unit::run`](crate::Unit::run) on the unit's
//! own thread. It carries the unit's cancellation token (the only stop
//! request the unit will ever get), read access to the process-wide
//! [`ShutdownContext`], and the tables through which the unit registers
//! external processes and client connections so the orchestrator can clean
//! them up.

use std::sync::Arc;

use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

use crate::context::ShutdownContext;
use crate::core::clients::{ClientId, ClientTable};
use crate::core::process::{Owner, ProcessId, ProcessTable, TrackClosed};

/// Per-unit runtime context. Cheap to clone.
#[derive(Clone)]
pub struct UnitContext {
    name: Arc<str>,
    token: CancellationToken,
    shutdown: Arc<ShutdownContext>,
    processes: ProcessTable,
    clients: ClientTable,
    helper_env: Arc<[(String, String)]>,
}

impl UnitContext {
    pub(crate) fn new(
        name: Arc<str>,
        token: CancellationToken,
        shutdown: Arc<ShutdownContext>,
        processes: ProcessTable,
        clients: ClientTable,
        helper_env: Arc<[(String, String)]>,
    ) -> Self {
        Self {
            name,
            token,
            shutdown,
            processes,
            clients,
            helper_env,
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the orchestrator asked this unit to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the orchestrator asks this unit to stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Process-wide flags (delegated requests are read-and-cleared from here).
    pub fn shutdown(&self) -> &Arc<ShutdownContext> {
        &self.shutdown
    }

    /// Registers a process owned by this unit; it is signalled and reaped during shutdown.
    ///
    /// After REAPING has started the process is only sent `SIGTERM` and the
    /// unit must collect it itself.
    pub async fn track_process(&self, pid: Pid) -> Result<ProcessId, TrackClosed> {
        self.processes.track(Owner::Unit(Arc::clone(&self.name)), pid).await
    }

    /// Registers an ad-hoc helper process; it is asked to terminate while draining.
    pub async fn track_helper(
        &self,
        helper: impl Into<Arc<str>>,
        pid: Pid,
    ) -> Result<ProcessId, TrackClosed> {
        self.processes.track(Owner::Helper(helper.into()), pid).await
    }

    /// Forgets a process this unit already collected itself.
    pub async fn release_process(&self, id: ProcessId) -> bool {
        self.processes.release(id).await
    }

    /// Registers an inbound connection; the returned token is cancelled on shutdown.
    pub async fn register_client(&self, label: impl Into<Arc<str>>) -> (ClientId, CancellationToken) {
        self.clients.register(label, &self.token).await
    }

    /// Removes a client whose connection ended on its own.
    pub async fn release_client(&self, id: ClientId) -> bool {
        self.clients.release(id).await
    }

    /// Environment (`NAME`, `value`) pairs to pass to spawned helper processes.
    ///
    /// Contains the verified required directories. The agent's own
    /// environment is never modified.
    pub fn helper_env(&self) -> &[(String, String)] {
        &self.helper_env
    }
}
