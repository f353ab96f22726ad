//! # Lifecycle events emitted by the supervisor and its units.
//!
//! The [`EventKind`] enum classifies event types across three groups:
//! - **Startup events**: resolution, initialization and launch of units
//! - **Unit events**: a unit's own run routine finishing
//! - **Shutdown events**: the orchestrator's DRAINING, REAPING and TERMINATED steps
//!
//! The [`Event`] struct carries optional metadata: unit name, pid, signal,
//! exit code, counts and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use unitvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessSignaled)
//!     .with_unit("plugins.d")
//!     .with_pid(4242)
//!     .with_signal("SIGTERM");
//!
//! assert_eq!(ev.kind, EventKind::ProcessSignaled);
//! assert_eq!(ev.unit.as_deref(), Some("plugins.d"));
//! assert_eq!(ev.pid, Some(4242));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Startup events ===
    /// Unit resolved to disabled; it will never get a task.
    ///
    /// Sets: `unit`
    UnitDisabled,

    /// Unit's init routine completed.
    ///
    /// Sets: `unit`
    UnitInitialized,

    /// Unit thread created and detached.
    ///
    /// Sets: `unit`, `stack_size`
    UnitLaunched,

    /// Unit thread could not be created (isolated failure).
    ///
    /// Sets: `unit`, `reason`
    UnitLaunchFailed,

    /// Every enabled unit was launched and notifications were unblocked.
    ///
    /// Sets: `count` (units running)
    SignalsUnblocked,

    /// Config-check-only mode finished initialization; nothing was launched.
    CheckOnlyCompleted,

    /// A fatal-startup error aborted the process before any unit launched.
    ///
    /// Sets: `reason`, `code`
    StartupFailed,

    // === Unit events ===
    /// Unit's run routine returned successfully or after cancellation.
    ///
    /// Sets: `unit`
    UnitStopped,

    /// Unit's run routine returned an error.
    ///
    /// Sets: `unit`, `reason`
    UnitFailed,

    // === Shutdown events ===
    /// exit-requested observed; the orchestrator left RUNNING.
    ShutdownRequested,

    /// Cooperative cancellation issued to a unit's task.
    ///
    /// Sets: `unit`
    UnitCancelled,

    /// Client handle marked obsolete and cancelled.
    ///
    /// Sets: `unit` (client label), `count` (client id)
    ClientCancelled,

    /// A running helper process was asked to terminate.
    ///
    /// Sets: `unit` (helper name), `pid`
    HelperTerminating,

    /// Termination signal delivered to an external process.
    ///
    /// Sets: `unit` (owner), `pid`, `signal`
    ProcessSignaled,

    /// Termination signal not delivered (absent, no permission or OS error).
    ///
    /// Sets: `unit` (owner), `pid`, `signal`, `reason`
    ProcessNotSignaled,

    /// Exit status collected for a signalled process.
    ///
    /// Sets: `unit` (owner), `pid`, `reason` (exit description)
    ProcessReaped,

    /// Reap deadline passed; the process was killed.
    ///
    /// Sets: `unit` (owner), `pid`
    ProcessEscalated,

    /// The orchestrator waited on a pid that is not its child.
    ///
    /// Sets: `unit` (owner), `pid`, `reason`
    ReapAnomaly,

    /// Non-blocking collection of unaccounted children.
    ///
    /// Sets: `count`
    OrphansSwept,

    /// Storage collaborator persisted its state.
    StatePersisted,

    /// Pid-file removed.
    ///
    /// Sets: `reason` (path)
    PidFileRemoved,

    /// Pid-file removal failed (logged, never fatal).
    ///
    /// Sets: `reason`
    PidFileRemoveFailed,

    /// Final event; the process exits with `code`.
    ///
    /// Sets: `code`
    Terminated,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Unit, client or helper name, if applicable.
    pub unit: Option<Arc<str>>,
    /// Human-readable reason (errors, outcomes, paths).
    pub reason: Option<Arc<str>>,
    /// External process id.
    pub pid: Option<i32>,
    /// Signal name (`SIGTERM`, ...).
    pub signal: Option<&'static str>,
    /// Exit code.
    pub code: Option<i32>,
    /// Generic counter (units running, orphans swept, client id).
    pub count: Option<u64>,
    /// Stack size applied to a unit thread, in bytes.
    pub stack_size: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            unit: None,
            reason: None,
            pid: None,
            signal: None,
            code: None,
            count: None,
            stack_size: None,
        }
    }

    #[inline]
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_signal(mut self, signal: &'static str) -> Self {
        self.signal = Some(signal);
        self
    }

    #[inline]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    #[inline]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    #[inline]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}
