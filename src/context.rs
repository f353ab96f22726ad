//! # Process-wide shutdown context.
//!
//! [`ShutdownContext`] holds the four one-way flags written from signal
//! context (or from an internal fatal path) and read from any thread:
//!
//! | Flag                | Set by                    | Consumed by                         |
//! |---------------------|---------------------------|-------------------------------------|
//! | `exit_requested`    | SIGINT/SIGTERM/SIGQUIT    | supervisor control loop (latched)   |
//! | `reopen_logs`       | SIGHUP                    | log collaborator (`take_reopen_logs`) |
//! | `save_now`          | SIGUSR1                   | storage collaborator (`take_save_now`) |
//! | `reload_health`     | SIGUSR2                   | health collaborator (`take_reload_health`) |
//!
//! ## Rules
//! - Signal handlers perform a single atomic store on one of the flags, nothing else.
//! - `exit_requested` is never reset once set.
//! - Delegated flags are read-and-cleared by their collaborator on its own schedule.
//! - [`ShutdownContext::request_exit`] is the internal (non-signal) path; it also
//!   wakes the control loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared flags that drive the supervisor's deferred reactions.
#[derive(Debug, Default)]
pub struct ShutdownContext {
    exit: Arc<AtomicBool>,
    reopen_logs: Arc<AtomicBool>,
    save_now: Arc<AtomicBool>,
    reload_health: Arc<AtomicBool>,
    wake: Notify,
}

impl ShutdownContext {
    /// Creates a context with every flag cleared.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latches exit-requested from normal (non-signal) context and wakes the control loop.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// True once shutdown has been asked for.
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Reads and clears the reopen-logs request.
    pub fn take_reopen_logs(&self) -> bool {
        self.reopen_logs.swap(false, Ordering::AcqRel)
    }

    /// Reads and clears the save-now request.
    pub fn take_save_now(&self) -> bool {
        self.save_now.swap(false, Ordering::AcqRel)
    }

    /// Reads and clears the reload-health request.
    pub fn take_reload_health(&self) -> bool {
        self.reload_health.swap(false, Ordering::AcqRel)
    }

    /// Completes after the next [`request_exit`](Self::request_exit).
    ///
    /// A request made before the call is not lost (the permit is stored).
    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    pub(crate) fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit)
    }

    pub(crate) fn reopen_logs_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reopen_logs)
    }

    pub(crate) fn save_now_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.save_now)
    }

    pub(crate) fn reload_health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reload_health)
    }
}
