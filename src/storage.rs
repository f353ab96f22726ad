//! # Storage collaborator.
//!
//! The supervisor does not own the metric store. It only needs one
//! operation from it at the very end of shutdown, [`Storage::persist_all`],
//! plus the save-now request it reads from the
//! [`ShutdownContext`](crate::ShutdownContext) on its own schedule.

/// Persistent state owned outside the supervisor.
pub trait Storage: Send + Sync + 'static {
    /// Flushes everything to persistent storage. Called once, in TERMINATED.
    ///
    /// Runs on a blocking thread; failures are the collaborator's to report.
    fn persist_all(&self);

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "storage"
    }
}

/// Storage that has nothing to persist.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl Storage for NoStorage {
    fn persist_all(&self) {}

    fn name(&self) -> &'static str {
        "none"
    }
}
