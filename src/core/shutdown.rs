//! # Shutdown orchestrator.
//!
//! A one-shot state machine driven by the supervisor once exit-requested is
//! observed (or a fatal-startup error occurred):
//!
//! ```text
//! RUNNING ──► DRAINING ──► REAPING ──► TERMINATED
//!   │            │            │            │
//!   │            │            │            ├─ storage.persist_all()
//!   │            │            │            ├─ remove pid-file (if written)
//!   │            │            │            └─ return exit code
//!   │            │            ├─ per unit process: safe_signal(SIGTERM) → reap(pid) if delivered
//!   │            │            └─ sweep other exited children (non-blocking)
//!   │            ├─ cancel every enabled unit, set enabled=false
//!   │            ├─ cancel every live client handle, mark obsolete
//!   │            └─ ask running helpers to terminate
//!   └─ latched: a second shutdown() returns the first code and does nothing
//! ```
//!
//! ## Rules
//! - No step can fail the sequence; outcomes are published and the next step runs.
//! - Each entity is touched once: units via `enabled`, processes and clients via `obsolete`.
//! - Units are never awaited. The only blocking wait is the pid-bound reap,
//!   bounded when a reap deadline is configured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::config::Config;
use crate::core::clients::ClientTable;
use crate::core::process::{
    self, ClaimKind, Delivery, Owner, ProcessTable, ReapOutcome, ReapReport, safe_signal,
};
use crate::core::registry::Registry;
use crate::events::{Bus, Event, EventKind};
use crate::startup;
use crate::storage::Storage;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Reaping,
    Terminated,
}

/// Drives DRAINING → REAPING → TERMINATED exactly once.
pub struct Orchestrator {
    phase: Phase,
    exit_code: Option<i32>,
    bus: Bus,
    processes: ProcessTable,
    clients: ClientTable,
    storage: Arc<dyn Storage>,
    pid_file: Option<PathBuf>,
    reap_deadline: Option<Duration>,
    sweep_orphans: bool,
}

impl Orchestrator {
    pub fn new(
        cfg: &Config,
        bus: Bus,
        processes: ProcessTable,
        clients: ClientTable,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            phase: Phase::Running,
            exit_code: None,
            bus,
            processes,
            clients,
            storage,
            pid_file: None,
            reap_deadline: cfg.reap_deadline(),
            sweep_orphans: cfg.sweep_orphans,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Records a pid-file this process wrote; only that file is removed at TERMINATED.
    pub(crate) fn own_pid_file(&mut self, path: PathBuf) {
        self.pid_file = Some(path);
    }

    /// Runs the whole sequence and returns the exit code.
    ///
    /// Latched: later calls return the code of the first call without doing anything.
    pub async fn shutdown(&mut self, registry: &mut Registry, code: i32) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        self.exit_code = Some(code);
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_code(code));

        self.phase = Phase::Draining;
        self.drain(registry).await;

        self.phase = Phase::Reaping;
        self.reap().await;

        self.terminate(code).await
    }

    /// DRAINING: cancellation requests only, nothing is awaited.
    pub(crate) async fn drain(&self, registry: &mut Registry) {
        for entry in registry.entries_mut() {
            if entry.disable() && entry.is_launched() {
                self.bus
                    .publish(Event::new(EventKind::UnitCancelled).with_unit(entry.name()));
            }
        }

        for (id, label) in self.clients.cancel_all().await {
            self.bus.publish(
                Event::new(EventKind::ClientCancelled)
                    .with_unit(label)
                    .with_count(id),
            );
        }

        for (owner, pid) in self.processes.claim_all(ClaimKind::Helpers).await {
            self.bus.publish(
                Event::new(EventKind::HelperTerminating)
                    .with_unit(Arc::clone(owner.name()))
                    .with_pid(pid.as_raw()),
            );
            self.publish_delivery(&owner, pid, safe_signal(pid, Signal::SIGTERM));
        }
    }

    /// REAPING: signal and collect every unit-owned process once, then sweep.
    pub(crate) async fn reap(&self) {
        for (owner, pid) in self.processes.claim_all(ClaimKind::UnitProcesses).await {
            let delivery = safe_signal(pid, Signal::SIGTERM);
            self.publish_delivery(&owner, pid, delivery);
            if !delivery.is_delivered() {
                continue;
            }

            let deadline = self.reap_deadline;
            match tokio::task::spawn_blocking(move || process::reap(pid, deadline)).await {
                Ok(report) => self.publish_reap(&owner, pid, report),
                Err(e) => self.bus.publish(
                    Event::new(EventKind::ReapAnomaly)
                        .with_unit(Arc::clone(owner.name()))
                        .with_pid(pid.as_raw())
                        .with_reason(format!("reap task failed: {e}")),
                ),
            }
        }

        if self.sweep_orphans {
            let swept = tokio::task::spawn_blocking(process::sweep_children)
                .await
                .unwrap_or(0);
            self.bus
                .publish(Event::new(EventKind::OrphansSwept).with_count(swept));
        }
    }

    /// TERMINATED: persist, drop the pid-file, report the code.
    async fn terminate(&mut self, code: i32) -> i32 {
        let storage = Arc::clone(&self.storage);
        let name = storage.name();
        match tokio::task::spawn_blocking(move || storage.persist_all()).await {
            Ok(()) => self
                .bus
                .publish(Event::new(EventKind::StatePersisted).with_reason(name)),
            Err(e) => tracing::error!(storage = name, error = %e, "persist_all panicked"),
        }

        if let Some(path) = self.pid_file.take() {
            let shown = path.display().to_string();
            match startup::remove_pid_file(&path) {
                Ok(true) => self
                    .bus
                    .publish(Event::new(EventKind::PidFileRemoved).with_reason(shown)),
                Ok(false) => {}
                Err(e) => self.bus.publish(
                    Event::new(EventKind::PidFileRemoveFailed)
                        .with_reason(format!("{shown}: {e}")),
                ),
            }
        }

        self.phase = Phase::Terminated;
        self.bus
            .publish(Event::new(EventKind::Terminated).with_code(code));
        code
    }

    fn publish_delivery(&self, owner: &Owner, pid: Pid, delivery: Delivery) {
        let ev = match delivery {
            Delivery::Delivered => Event::new(EventKind::ProcessSignaled),
            Delivery::Refused { stage, cause } => Event::new(EventKind::ProcessNotSignaled)
                .with_reason(format!("{stage:?}: {cause}").to_lowercase()),
        };
        self.bus.publish(
            ev.with_unit(Arc::clone(owner.name()))
                .with_pid(pid.as_raw())
                .with_signal(Signal::SIGTERM.as_str()),
        );
    }

    fn publish_reap(&self, owner: &Owner, pid: Pid, report: ReapReport) {
        if report.escalated {
            self.bus.publish(
                Event::new(EventKind::ProcessEscalated)
                    .with_unit(Arc::clone(owner.name()))
                    .with_pid(pid.as_raw())
                    .with_signal(Signal::SIGKILL.as_str()),
            );
        }
        let kind = match report.outcome {
            ReapOutcome::Exited(_) | ReapOutcome::Signaled(_) => EventKind::ProcessReaped,
            ReapOutcome::NotChild | ReapOutcome::Failed(_) => EventKind::ReapAnomaly,
        };
        self.bus.publish(
            Event::new(kind)
                .with_unit(Arc::clone(owner.name()))
                .with_pid(pid.as_raw())
                .with_reason(report.outcome.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    use crate::config::Settings;
    use crate::core::launcher::Launcher;
    use crate::context::ShutdownContext;
    use crate::error::UnitError;
    use crate::units::{UnitContext, UnitFn, UnitSpec};

    #[derive(Default)]
    struct CountingStorage(AtomicUsize);

    impl Storage for CountingStorage {
        fn persist_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cfg() -> Config {
        Config {
            sweep_orphans: false,
            ..Config::default()
        }
    }

    fn collect(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    /// Registry with `n` enabled, launched units that wait for cancellation.
    fn launched_registry(n: usize, bus: &Bus, processes: &ProcessTable) -> Registry {
        let specs = (0..n)
            .map(|i| {
                UnitSpec::new(UnitFn::arc(format!("unit-{i}"), |ctx: UnitContext| async move {
                    ctx.cancelled().await;
                    Ok::<_, UnitError>(())
                }))
            })
            .collect();
        let mut registry = Registry::new(specs).unwrap();
        registry.resolve_all(&Settings::new(), bus);

        let launcher = Launcher::new(2 << 20, bus.clone());
        let shutdown = ShutdownContext::new();
        for entry in registry.entries_mut() {
            let ctx = UnitContext::new(
                Arc::from(entry.name()),
                CancellationToken::new(),
                Arc::clone(&shutdown),
                processes.clone(),
                ClientTable::new(),
                Arc::from(Vec::new()),
            );
            let handle = launcher.launch(entry.spec(), ctx).unwrap();
            entry.attach(handle);
        }
        registry
    }

    #[tokio::test]
    async fn test_clean_shutdown_cancels_every_unit() {
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        let storage = Arc::new(CountingStorage::default());
        let mut registry = launched_registry(3, &bus, &processes);

        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("agent.pid");
        startup::write_pid_file(&pid_file).unwrap();

        let mut orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes,
            ClientTable::new(),
            storage.clone(),
        );
        orch.own_pid_file(pid_file.clone());

        assert_eq!(orch.shutdown(&mut registry, 0).await, 0);
        assert_eq!(orch.phase(), Phase::Terminated);

        let events = collect(&mut rx);
        assert_eq!(count(&events, EventKind::UnitCancelled), 3);
        assert_eq!(count(&events, EventKind::PidFileRemoved), 1);
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Terminated));
        assert!(!pid_file.exists());
        assert_eq!(storage.0.load(Ordering::SeqCst), 1);
        assert!(registry.entries().iter().all(|e| !e.is_enabled()));
    }

    #[tokio::test]
    async fn test_dead_process_is_not_waited_for() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        processes
            .track(Owner::Unit(Arc::from("plugins.d")), Pid::from_raw(i32::MAX))
            .await
            .unwrap();
        let mut registry = Registry::new(Vec::new()).unwrap();

        let mut orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes.clone(),
            ClientTable::new(),
            Arc::new(crate::storage::NoStorage),
        );
        let code = tokio::time::timeout(Duration::from_secs(5), orch.shutdown(&mut registry, 0))
            .await
            .unwrap();
        assert_eq!(code, 0);

        let events = collect(&mut rx);
        let refused: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::ProcessNotSignaled)
            .collect();
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].reason.as_deref(), Some("probe: not running"));
        assert_eq!(count(&events, EventKind::ProcessReaped), 0);

        for (_, p) in processes.snapshot().await {
            assert!(p.obsolete);
            assert!(p.pid.is_none());
        }
    }

    #[tokio::test]
    async fn test_live_child_is_signalled_and_reaped() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        processes.track(Owner::Unit(Arc::from("tc")), pid).await.unwrap();

        let orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes,
            ClientTable::new(),
            Arc::new(crate::storage::NoStorage),
        );
        orch.reap().await;

        let events = collect(&mut rx);
        assert_eq!(count(&events, EventKind::ProcessSignaled), 1);
        let reaped: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::ProcessReaped)
            .collect();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].pid, Some(pid.as_raw()));
        assert_eq!(reaped[0].reason.as_deref(), Some("killed by SIGTERM"));
    }

    #[tokio::test]
    async fn test_running_helper_is_terminated_while_draining() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        processes
            .track(Owner::Helper(Arc::from("tc-qos-helper")), pid)
            .await
            .unwrap();
        let mut registry = Registry::new(Vec::new()).unwrap();

        let mut orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes.clone(),
            ClientTable::new(),
            Arc::new(crate::storage::NoStorage),
        );
        assert_eq!(orch.shutdown(&mut registry, 0).await, 0);

        // Helpers are asked to stop, never waited for.
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));

        let events = collect(&mut rx);
        let draining: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::HelperTerminating)
            .collect();
        assert_eq!(draining.len(), 1);
        assert_eq!(draining[0].pid, Some(pid.as_raw()));
        assert_eq!(count(&events, EventKind::ProcessSignaled), 1);
        assert_eq!(count(&events, EventKind::ProcessReaped), 0);
        assert!(processes.pids_of("tc-qos-helper").await.is_empty());
    }

    #[tokio::test]
    async fn test_reap_deadline_escalates() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        processes
            .track(Owner::Unit(Arc::from("plugins.d")), pid)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cfg = Config {
            reap_timeout: Duration::from_millis(300),
            ..cfg()
        };
        let orch = Orchestrator::new(
            &cfg,
            bus.clone(),
            processes,
            ClientTable::new(),
            Arc::new(crate::storage::NoStorage),
        );
        tokio::time::timeout(Duration::from_secs(5), orch.reap())
            .await
            .unwrap();

        let kinds: Vec<_> = collect(&mut rx)
            .into_iter()
            .filter(|e| e.pid == Some(pid.as_raw()))
            .map(|e| (e.kind, e.reason))
            .collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0].0, EventKind::ProcessSignaled);
        assert_eq!(kinds[1].0, EventKind::ProcessEscalated);
        assert_eq!(kinds[2].0, EventKind::ProcessReaped);
        assert_eq!(kinds[2].1.as_deref(), Some("killed by SIGKILL"));
    }

    #[tokio::test]
    async fn test_process_tracked_after_shutdown_is_signalled() {
        let bus = Bus::new(64);
        let processes = ProcessTable::new();
        let mut registry = Registry::new(Vec::new()).unwrap();
        let mut orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes.clone(),
            ClientTable::new(),
            Arc::new(crate::storage::NoStorage),
        );
        orch.shutdown(&mut registry, 0).await;

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let late = processes.track(Owner::Unit(Arc::from("plugins.d")), pid).await;
        assert!(late.unwrap_err().delivery.is_delivered());

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
        for (_, p) in processes.snapshot().await {
            assert!(p.pid.is_none());
        }
    }

    #[tokio::test]
    async fn test_repeated_passes_touch_nothing_twice() {
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let processes = ProcessTable::new();
        let clients = ClientTable::new();
        let parent = CancellationToken::new();
        let (_, client) = clients.register("web:1", &parent).await;
        processes
            .track(Owner::Unit(Arc::from("unit-0")), Pid::from_raw(i32::MAX))
            .await
            .unwrap();
        let mut registry = launched_registry(2, &bus, &processes);

        let mut orch = Orchestrator::new(
            &cfg(),
            bus.clone(),
            processes,
            clients,
            Arc::new(crate::storage::NoStorage),
        );
        orch.drain(&mut registry).await;
        orch.reap().await;
        let first = collect(&mut rx);

        orch.drain(&mut registry).await;
        orch.reap().await;
        let second = collect(&mut rx);

        assert_eq!(count(&first, EventKind::UnitCancelled), 2);
        assert_eq!(count(&first, EventKind::ClientCancelled), 1);
        assert_eq!(count(&first, EventKind::ProcessNotSignaled), 1);
        assert!(client.is_cancelled());
        assert!(second.iter().all(|e| !matches!(
            e.kind,
            EventKind::UnitCancelled | EventKind::ClientCancelled | EventKind::ProcessNotSignaled
        )));

        // Latched: the full sequence runs once, a second call only returns the code.
        assert_eq!(orch.shutdown(&mut registry, 0).await, 0);
        let _ = collect(&mut rx);
        assert_eq!(orch.shutdown(&mut registry, 7).await, 0);
        assert!(collect(&mut rx).is_empty());
    }
}
