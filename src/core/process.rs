//! # External processes: tracking, safe signalling and reaping.
//!
//! Everything here talks to the OS through `nix`:
//! - [`safe_signal`] probes with the null signal before delivering the real one;
//! - [`reap`] waits on exactly one pid (optionally with a deadline and `SIGKILL` escalation);
//! - [`sweep_children`] collects any other exited child without blocking.
//!
//! [`ProcessTable`] is the id-keyed table of external processes. Units and
//! helpers register into it at runtime; the orchestrator is the only writer
//! of the `obsolete` flag. Once the orchestrator has claimed a kind of
//! process, registering another one of that kind signals it instead.
//!
//! ## Outcome classification
//! ```text
//! kill(pid, 0) ──► ESRCH  → Refused{Probe, NotRunning}
//!              ├─► EPERM  → Refused{Probe, NoPermission}
//!              ├─► other  → Refused{Probe, Os(errno)}
//!              └─► Ok     → kill(pid, sig) ──► same three-way split at Deliver
//!                                          └─► Ok → Delivered
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tokio::sync::RwLock;

/// Interval between non-blocking polls in a deadline-bound reap.
const REAP_POLL: Duration = Duration::from_millis(50);

/// Which `kill` call produced the refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Existence probe with the null signal.
    Probe,
    /// The real signal.
    Deliver,
}

/// Why a signal was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// No such process (benign).
    NotRunning,
    /// The caller may not signal this process.
    NoPermission,
    /// Any other OS error.
    Os(Errno),
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NotRunning => f.write_str("not running"),
            Refusal::NoPermission => f.write_str("permission denied"),
            Refusal::Os(errno) => write!(f, "os error: {}", errno.desc()),
        }
    }
}

impl From<Errno> for Refusal {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::ESRCH => Refusal::NotRunning,
            Errno::EPERM => Refusal::NoPermission,
            other => Refusal::Os(other),
        }
    }
}

/// Result of [`safe_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Refused { stage: Stage, cause: Refusal },
}

impl Delivery {
    /// True when the real signal reached the process, so waiting for its exit is meaningful.
    #[inline]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Sends `signal` to `pid` only after verifying the process exists.
///
/// Never fails: every error is folded into [`Delivery::Refused`].
///
/// # Example
/// ```
/// use nix::sys::signal::Signal;
/// use nix::unistd::Pid;
/// use unitvisor::process::{Delivery, Refusal, Stage, safe_signal};
///
/// // pid_max on Linux is at most 2^22, so this pid never exists.
/// let out = safe_signal(Pid::from_raw(i32::MAX), Signal::SIGTERM);
/// assert_eq!(out, Delivery::Refused { stage: Stage::Probe, cause: Refusal::NotRunning });
/// ```
pub fn safe_signal(pid: Pid, signal: Signal) -> Delivery {
    if let Err(errno) = kill(pid, None) {
        return Delivery::Refused {
            stage: Stage::Probe,
            cause: errno.into(),
        };
    }
    match kill(pid, signal) {
        Ok(()) => Delivery::Delivered,
        Err(errno) => Delivery::Refused {
            stage: Stage::Deliver,
            cause: errno.into(),
        },
    }
}

/// How a pid-bound wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Exited normally with this status.
    Exited(i32),
    /// Killed by this signal.
    Signaled(Signal),
    /// The pid is not a child of this process (`ECHILD`).
    NotChild,
    /// `waitpid` failed for another reason.
    Failed(Errno),
}

impl fmt::Display for ReapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReapOutcome::Exited(code) => write!(f, "exited with status {code}"),
            ReapOutcome::Signaled(sig) => write!(f, "killed by {}", sig.as_str()),
            ReapOutcome::NotChild => f.write_str("not a child of this process"),
            ReapOutcome::Failed(errno) => write!(f, "waitpid failed: {}", errno.desc()),
        }
    }
}

/// Result of [`reap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub outcome: ReapOutcome,
    /// True when the deadline passed and `SIGKILL` was sent.
    pub escalated: bool,
}

/// Collects the exit status of exactly `pid`.
///
/// With `deadline = None` this blocks until the process exits. With a
/// deadline, the process is polled; once the deadline passes it receives
/// `SIGKILL` and the wait becomes blocking.
///
/// Blocking: call from `spawn_blocking` inside a runtime.
pub fn reap(pid: Pid, deadline: Option<Duration>) -> ReapReport {
    let Some(limit) = deadline else {
        return ReapReport {
            outcome: wait_blocking(pid),
            escalated: false,
        };
    };

    let started = Instant::now();
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => {
                if let Some(outcome) = classify(status) {
                    return ReapReport { outcome, escalated: false };
                }
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                return ReapReport {
                    outcome: classify_err(errno),
                    escalated: false,
                };
            }
        }

        if started.elapsed() >= limit {
            let _ = kill(pid, Signal::SIGKILL);
            return ReapReport {
                outcome: wait_blocking(pid),
                escalated: true,
            };
        }
        std::thread::sleep(REAP_POLL);
    }
}

/// Collects every already-exited child without blocking; returns how many were collected.
pub fn sweep_children() -> u64 {
    let mut collected = 0;
    loop {
        match waitpid(Option::<Pid>::None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => collected += 1,
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
    collected
}

fn wait_blocking(pid: Pid) -> ReapOutcome {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(outcome) = classify(status) {
                    return outcome;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => return classify_err(errno),
        }
    }
}

/// Terminal statuses only; stop/continue notifications keep the wait going.
fn classify(status: WaitStatus) -> Option<ReapOutcome> {
    match status {
        WaitStatus::Exited(_, code) => Some(ReapOutcome::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(ReapOutcome::Signaled(sig)),
        _ => None,
    }
}

fn classify_err(errno: Errno) -> ReapOutcome {
    match errno {
        Errno::ECHILD => ReapOutcome::NotChild,
        other => ReapOutcome::Failed(other),
    }
}

/// Stable id of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who an external process belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Owned by a unit; signalled and reaped during REAPING.
    Unit(Arc<str>),
    /// Ad-hoc helper; asked to terminate during DRAINING.
    Helper(Arc<str>),
}

impl Owner {
    pub fn name(&self) -> &Arc<str> {
        match self {
            Owner::Unit(n) | Owner::Helper(n) => n,
        }
    }

    fn is_helper(&self) -> bool {
        matches!(self, Owner::Helper(_))
    }
}

/// Tracked external process.
#[derive(Debug, Clone)]
pub struct ExternalProcess {
    pub owner: Owner,
    /// Cleared when the orchestrator claims the entry.
    pub pid: Option<Pid>,
    /// Set exactly once, when the orchestrator takes over the entry.
    pub obsolete: bool,
}

/// Which entries [`ProcessTable::claim_all`] takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimKind {
    Helpers,
    UnitProcesses,
}

/// Returned by [`ProcessTable::track`] once shutdown has claimed processes of that kind.
///
/// The table signalled the process with `SIGTERM` but does not hold it; the
/// caller still owns the child and must collect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shutdown already claimed this kind of process")]
pub struct TrackClosed {
    /// Outcome of the immediate `SIGTERM`.
    pub delivery: Delivery,
}

#[derive(Default)]
struct Entries {
    map: BTreeMap<ProcessId, ExternalProcess>,
    helpers_closed: bool,
    units_closed: bool,
}

impl Entries {
    fn closed_for(&self, owner: &Owner) -> bool {
        if owner.is_helper() {
            self.helpers_closed
        } else {
            self.units_closed
        }
    }
}

/// Id-keyed table of external processes.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct ProcessTable {
    entries: Arc<RwLock<Entries>>,
    next_id: Arc<AtomicU64>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `pid` for `owner`.
    ///
    /// Once [`claim_all`](Self::claim_all) has run for the owner's kind nothing
    /// would ever signal a new entry, so the process is sent `SIGTERM` right
    /// away and [`TrackClosed`] is returned instead.
    pub async fn track(&self, owner: Owner, pid: Pid) -> Result<ProcessId, TrackClosed> {
        let mut entries = self.entries.write().await;
        if entries.closed_for(&owner) {
            return Err(TrackClosed {
                delivery: safe_signal(pid, Signal::SIGTERM),
            });
        }
        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.map.insert(
            id,
            ExternalProcess {
                owner,
                pid: Some(pid),
                obsolete: false,
            },
        );
        Ok(id)
    }

    /// Stops tracking a process its owner already collected.
    ///
    /// Returns `false` if the entry is gone or already claimed by shutdown.
    pub async fn release(&self, id: ProcessId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.map.get(&id) {
            Some(p) if !p.obsolete => {
                entries.map.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Copy of every entry, in id order.
    pub async fn snapshot(&self) -> Vec<(ProcessId, ExternalProcess)> {
        let entries = self.entries.read().await;
        entries.map.iter().map(|(id, p)| (*id, p.clone())).collect()
    }

    /// Live pids registered by `owner_name`.
    pub async fn pids_of(&self, owner_name: &str) -> Vec<Pid> {
        let entries = self.entries.read().await;
        entries
            .map
            .values()
            .filter(|p| p.owner.name().as_ref() == owner_name)
            .filter_map(|p| p.pid)
            .collect()
    }

    /// Marks every matching, not-yet-obsolete entry obsolete, takes its pid and returns it.
    ///
    /// Entries already obsolete are skipped, so a second pass returns nothing.
    /// Closes the table for that kind: later [`track`](Self::track) calls are refused.
    pub(crate) async fn claim_all(&self, kind: ClaimKind) -> Vec<(Owner, Pid)> {
        let mut entries = self.entries.write().await;
        match kind {
            ClaimKind::Helpers => entries.helpers_closed = true,
            ClaimKind::UnitProcesses => entries.units_closed = true,
        }
        let mut claimed = Vec::new();
        for p in entries.map.values_mut() {
            let wanted = match kind {
                ClaimKind::Helpers => p.owner.is_helper(),
                ClaimKind::UnitProcesses => !p.owner.is_helper(),
            };
            if !wanted || p.obsolete {
                continue;
            }
            p.obsolete = true;
            if let Some(pid) = p.pid.take() {
                claimed.push((p.owner.clone(), pid));
            }
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn unit(name: &str) -> Owner {
        Owner::Unit(Arc::from(name))
    }

    #[test]
    fn test_absent_pid_is_not_delivered() {
        let out = safe_signal(Pid::from_raw(i32::MAX), Signal::SIGTERM);
        assert!(!out.is_delivered());
        assert_eq!(
            out,
            Delivery::Refused {
                stage: Stage::Probe,
                cause: Refusal::NotRunning
            }
        );
    }

    #[test]
    fn test_errno_classification() {
        assert_eq!(Refusal::from(Errno::ESRCH), Refusal::NotRunning);
        assert_eq!(Refusal::from(Errno::EPERM), Refusal::NoPermission);
        assert_eq!(Refusal::from(Errno::EINVAL), Refusal::Os(Errno::EINVAL));
    }

    #[test]
    fn test_signal_and_reap_live_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        assert!(safe_signal(pid, Signal::SIGTERM).is_delivered());
        let report = reap(pid, None);
        assert_eq!(report.outcome, ReapOutcome::Signaled(Signal::SIGTERM));
        assert!(!report.escalated);

        // Collected: a second wait finds no such child.
        assert_eq!(reap(pid, None).outcome, ReapOutcome::NotChild);
    }

    #[test]
    fn test_deadline_escalates_to_sigkill() {
        // Ignores SIGTERM, so only the escalation can stop it.
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        std::thread::sleep(Duration::from_millis(200));

        let _ = safe_signal(pid, Signal::SIGTERM);
        let report = reap(pid, Some(Duration::from_millis(300)));
        assert!(report.escalated);
        assert_eq!(report.outcome, ReapOutcome::Signaled(Signal::SIGKILL));
    }

    #[test]
    fn test_reap_of_non_child_is_an_anomaly() {
        assert_eq!(reap(Pid::from_raw(1), None).outcome, ReapOutcome::NotChild);
    }

    #[tokio::test]
    async fn test_claim_is_idempotent() {
        let table = ProcessTable::new();
        table.track(unit("a"), Pid::from_raw(100)).await.unwrap();
        table
            .track(Owner::Helper(Arc::from("tc")), Pid::from_raw(101))
            .await
            .unwrap();

        let units = table.claim_all(ClaimKind::UnitProcesses).await;
        assert_eq!(units, vec![(unit("a"), Pid::from_raw(100))]);
        assert!(table.claim_all(ClaimKind::UnitProcesses).await.is_empty());

        let helpers = table.claim_all(ClaimKind::Helpers).await;
        assert_eq!(helpers.len(), 1);
        assert!(table.claim_all(ClaimKind::Helpers).await.is_empty());

        for (_, p) in table.snapshot().await {
            assert!(p.obsolete);
            assert!(p.pid.is_none());
        }
    }

    #[tokio::test]
    async fn test_late_track_is_signalled_not_recorded() {
        let table = ProcessTable::new();
        table.claim_all(ClaimKind::UnitProcesses).await;

        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let err = table.track(unit("plugins.d"), pid).await.unwrap_err();
        assert_eq!(err.delivery, Delivery::Delivered);
        assert!(table.snapshot().await.is_empty());
        assert_eq!(reap(pid, None).outcome, ReapOutcome::Signaled(Signal::SIGTERM));

        // Helpers stay open until their own claim.
        let helper = Owner::Helper(Arc::from("tc"));
        assert!(table.track(helper.clone(), Pid::from_raw(i32::MAX)).await.is_ok());
        table.claim_all(ClaimKind::Helpers).await;
        let err = table.track(helper, Pid::from_raw(i32::MAX)).await.unwrap_err();
        assert!(!err.delivery.is_delivered());
    }

    #[tokio::test]
    async fn test_release_before_shutdown_only() {
        let table = ProcessTable::new();
        let a = table.track(unit("a"), Pid::from_raw(100)).await.unwrap();
        let b = table.track(unit("b"), Pid::from_raw(200)).await.unwrap();

        assert!(table.release(a).await);
        assert!(!table.release(a).await);
        assert_eq!(table.pids_of("b").await, vec![Pid::from_raw(200)]);

        table.claim_all(ClaimKind::UnitProcesses).await;
        assert!(!table.release(b).await);
    }
}
