//! # LogWriter: structured event logger
//!
//! A subscriber that renders incoming [`Event`]s as `tracing` records.
//! Routine progress is logged at `info`, skipped work at `debug`, outcomes that
//! an operator should look at at `warn`/`error`.
//!
//! ## Example output
//! ```text
//! INFO unit launched unit="proc" stack_size=2097152
//! INFO signals unblocked running=5
//! INFO shutdown requested
//! INFO stopping unit unit="proc"
//! WARN termination signal not delivered owner="plugins.d" pid=4242 signal="SIGTERM" reason="not running"
//! INFO exiting code=0
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let unit = e.unit.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::UnitDisabled => debug!(unit, "not starting unit"),
            EventKind::UnitInitialized => debug!(unit, "unit initialized"),
            EventKind::UnitLaunched => info!(unit, stack_size = e.stack_size, "unit launched"),
            EventKind::UnitLaunchFailed => error!(unit, reason, "failed to launch unit"),
            EventKind::SignalsUnblocked => {
                info!(running = e.count, "initialization completed, signals unblocked")
            }
            EventKind::CheckOnlyCompleted => info!("configuration check completed"),
            EventKind::StartupFailed => error!(reason, code = e.code, "fatal startup error"),
            EventKind::UnitStopped => info!(unit, "unit stopped"),
            EventKind::UnitFailed => warn!(unit, reason, "unit failed"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::UnitCancelled => info!(unit, "stopping unit"),
            EventKind::ClientCancelled => info!(client = unit, id = e.count, "stopping client"),
            EventKind::HelperTerminating => info!(helper = unit, pid = e.pid, "killing helper process"),
            EventKind::ProcessSignaled => {
                info!(owner = unit, pid = e.pid, signal = e.signal, "termination signal delivered")
            }
            EventKind::ProcessNotSignaled => warn!(
                owner = unit,
                pid = e.pid,
                signal = e.signal,
                reason,
                "termination signal not delivered"
            ),
            EventKind::ProcessReaped => info!(owner = unit, pid = e.pid, status = reason, "process reaped"),
            EventKind::ProcessEscalated => warn!(owner = unit, pid = e.pid, "reap deadline passed, killed"),
            EventKind::ReapAnomaly => error!(owner = unit, pid = e.pid, reason, "reap anomaly"),
            EventKind::OrphansSwept => info!(collected = e.count, "other children cleaned up"),
            EventKind::StatePersisted => info!("state persisted"),
            EventKind::PidFileRemoved => debug!(path = reason, "pid file removed"),
            EventKind::PidFileRemoveFailed => error!(reason, "cannot remove pid file"),
            EventKind::Terminated => info!(code = e.code, "exiting, bye bye"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
