//! # Supervisor: startup, launch, control loop and shutdown.
//!
//! The [`Supervisor`] owns the event bus, the subscribers and the unit specs,
//! and drives one process run from start to exit code.
//!
//! ## High-level architecture
//! ```text
//! Supervisor::run(settings)
//!   │
//!   ├─ listener: Bus.subscribe() ─► SubscriberSet::emit(&Event)  (until Terminated)
//!   │
//!   ├─ prepare (signals blocked on this thread):
//!   │     Registry::new(specs) → SignalRouter::install
//!   │     verify_directories → write_pid_file
//!   │     resolve_all(settings) → initialize(settings)
//!   │          any error ─────────────────────────────► StartupFailed ─► shutdown(1)
//!   │     check_only ────────────────────────────────► CheckOnlyCompleted ─► shutdown(1)
//!   │
//!   ├─ launch: UnitSpec[0] UnitSpec[1] ... (enabled only, registration order)
//!   │     └─► Launcher::launch → detached thread, own runtime, own CancellationToken
//!   │
//!   ├─ unblock signals ─► SignalsUnblocked
//!   │
//!   ├─ control loop: router.next() until exit-requested
//!   │     (delegated flags are left for their collaborators)
//!   │
//!   └─ Orchestrator::shutdown(0): DRAINING → REAPING → TERMINATED
//! ```
//!
//! ## Threading
//! `run` must be driven on a current-thread runtime owned by the control
//! thread, so that blocking the signals on this thread covers every task
//! that exists during startup.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use unitvisor::{Config, Settings, Supervisor, UnitContext, UnitError, UnitFn, UnitSpec};
//!
//! let settings = Settings::new();
//! let cfg = Config::from_settings(&settings);
//!
//! let ticker = UnitSpec::new(UnitFn::arc("ticker", |ctx: UnitContext| async move {
//!     while !ctx.is_cancelled() {
//!         tokio::time::sleep(std::time::Duration::from_millis(250)).await;
//!     }
//!     Ok::<_, UnitError>(())
//! }));
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! let code = rt.block_on(Supervisor::builder(cfg).with_unit(ticker).build().run(&settings));
//! std::process::exit(code);
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Settings};
use crate::context::ShutdownContext;
use crate::core::builder::SupervisorBuilder;
use crate::core::clients::ClientTable;
use crate::core::launcher::{Launcher, platform_default_stack_size, resolve_stack_size};
use crate::core::process::ProcessTable;
use crate::core::registry::Registry;
use crate::core::shutdown::Orchestrator;
use crate::core::signals::{self, SignalRouter};
use crate::error::StartupError;
use crate::events::{Bus, Event, EventKind};
use crate::startup;
use crate::storage::Storage;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::units::{UnitContext, UnitSpec};

/// Coordinates one process run: units, signals and shutdown.
pub struct Supervisor {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) subscribers: Vec<Arc<dyn Subscribe>>,
    pub(crate) units: Vec<UnitSpec>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) ctx: Arc<ShutdownContext>,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    /// Process-wide flags; call [`ShutdownContext::request_exit`] on it to stop a running supervisor.
    pub fn context(&self) -> &Arc<ShutdownContext> {
        &self.ctx
    }

    /// Bus the supervisor publishes on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runs until shutdown completes and returns the process exit code.
    ///
    /// `0` after a requested shutdown; non-zero after a fatal-startup error or
    /// in check-only mode.
    pub async fn run(self, settings: &Settings) -> i32 {
        let Self {
            cfg,
            bus,
            subscribers,
            units,
            storage,
            ctx,
        } = self;

        let listener = spawn_listener(&bus, subscribers);
        let processes = ProcessTable::new();
        let clients = ClientTable::new();
        let mut orch = Orchestrator::new(&cfg, bus.clone(), processes.clone(), clients.clone(), storage);
        let mut registry = Registry::default();

        let code = match prepare(&cfg, &bus, &ctx, units, settings, &mut registry, &mut orch) {
            Err(err) => {
                publish_failure(&bus, &err);
                orch.shutdown(&mut registry, err.exit_code()).await
            }
            Ok(_) if cfg.check_only => {
                bus.publish(Event::new(EventKind::CheckOnlyCompleted));
                orch.shutdown(&mut registry, 1).await
            }
            Ok(Prepared { mut router, helper_env }) => {
                let stack = resolve_stack_size(platform_default_stack_size(), cfg.stack_override());
                let launcher = Launcher::new(stack, bus.clone());
                for entry in registry.entries_mut().iter_mut().filter(|e| e.is_enabled()) {
                    let unit_ctx = UnitContext::new(
                        Arc::from(entry.name()),
                        CancellationToken::new(),
                        Arc::clone(&ctx),
                        processes.clone(),
                        clients.clone(),
                        Arc::clone(&helper_env),
                    );
                    // Failures are published by the launcher and leave the entry without a handle.
                    if let Ok(handle) = launcher.launch(entry.spec(), unit_ctx) {
                        entry.attach(handle);
                    }
                }

                match signals::unblock() {
                    Err(err) => {
                        publish_failure(&bus, &err);
                        orch.shutdown(&mut registry, err.exit_code()).await
                    }
                    Ok(()) => {
                        let running = registry.entries().iter().filter(|e| e.is_launched()).count();
                        bus.publish(Event::new(EventKind::SignalsUnblocked).with_count(running as u64));
                        control_loop(&ctx, &mut router).await;
                        orch.shutdown(&mut registry, 0).await
                    }
                }
            }
        };

        let _ = listener.await;
        code
    }
}

/// Result of a successful startup preparation.
struct Prepared {
    router: SignalRouter,
    helper_env: Arc<[(String, String)]>,
}

/// Everything before the first launch, in order. Stops at the first error.
fn prepare(
    cfg: &Config,
    bus: &Bus,
    ctx: &Arc<ShutdownContext>,
    units: Vec<UnitSpec>,
    settings: &Settings,
    registry: &mut Registry,
    orch: &mut Orchestrator,
) -> Result<Prepared, StartupError> {
    signals::block()?;
    *registry = Registry::new(units)?;
    let router = SignalRouter::install(ctx)?;

    let helper_env = startup::verify_directories(&cfg.directories)?;
    if let Some(path) = &cfg.pid_file {
        startup::write_pid_file(path)?;
        orch.own_pid_file(path.clone());
    }

    registry.resolve_all(settings, bus);
    registry.initialize(settings, bus)?;
    Ok(Prepared {
        router,
        helper_env: Arc::from(helper_env),
    })
}

fn publish_failure(bus: &Bus, err: &StartupError) {
    bus.publish(
        Event::new(EventKind::StartupFailed)
            .with_reason(format!("{}: {err}", err.as_label()))
            .with_code(err.exit_code()),
    );
}

/// Sleeps until exit-requested is set. Delegated flags stay set for their collaborators.
async fn control_loop(ctx: &ShutdownContext, router: &mut SignalRouter) {
    while !ctx.exit_requested() {
        let notification = router.next().await;
        tracing::debug!(?notification, "control loop woke");
    }
}

/// Forwards bus events to the subscribers until `Terminated`, then drains them.
fn spawn_listener(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    set.emit(&ev);
                    if ev.kind == EventKind::Terminated {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::config::RequiredDir;
    use crate::error::UnitError;
    use crate::subscribers::testing::Recorder;
    use crate::units::UnitFn;

    fn cfg() -> Config {
        Config {
            sweep_orphans: false,
            ..Config::default()
        }
    }

    /// Unit that records it ran and waits for cancellation.
    fn waiter(name: &'static str, ran: &Arc<AtomicBool>) -> UnitSpec {
        let ran = Arc::clone(ran);
        UnitSpec::new(UnitFn::arc(name, move |ctx: UnitContext| {
            let ran = Arc::clone(&ran);
            async move {
                ran.store(true, Ordering::SeqCst);
                ctx.cancelled().await;
                Ok::<_, UnitError>(())
            }
        }))
    }

    fn request_exit_later(sup: &Supervisor) {
        let ctx = Arc::clone(sup.context());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.request_exit();
        });
    }

    #[tokio::test]
    async fn test_requested_shutdown_exits_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("agent.pid");
        let rec = Recorder::new();
        let ran = Arc::new(AtomicBool::new(false));

        let sup = Supervisor::builder(Config {
            pid_file: Some(pid_file.clone()),
            ..cfg()
        })
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .with_units(vec![waiter("a", &ran), waiter("b", &ran), waiter("c", &ran)])
        .build();
        request_exit_later(&sup);

        let code = tokio::time::timeout(Duration::from_secs(10), sup.run(&Settings::new()))
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(rec.count(EventKind::UnitLaunched), 3);
        assert_eq!(rec.units(EventKind::UnitCancelled), vec!["a", "b", "c"]);
        assert_eq!(rec.count(EventKind::PidFileRemoved), 1);
        assert_eq!(rec.count(EventKind::Terminated), 1);
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_launches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let ran = Arc::new(AtomicBool::new(false));

        let sup = Supervisor::builder(Config {
            directories: vec![RequiredDir {
                name: "lib".into(),
                env: "UNITVISOR_LIB_DIR".into(),
                path: tmp.path().join("missing"),
            }],
            ..cfg()
        })
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .with_unit(waiter("a", &ran))
        .build();

        let code = sup.run(&Settings::new()).await;

        assert_ne!(code, 0);
        assert_eq!(rec.count(EventKind::StartupFailed), 1);
        assert_eq!(rec.count(EventKind::UnitLaunched), 0);
        assert_eq!(rec.count(EventKind::UnitInitialized), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disabled_unit_is_never_started() {
        let rec = Recorder::new();
        let on = Arc::new(AtomicBool::new(false));
        let off = Arc::new(AtomicBool::new(false));
        let settings = Settings::from_json(r#"{ "plugins": { "proc": "no" } }"#).unwrap();

        let sup = Supervisor::builder(cfg())
            .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
            .with_unit(waiter("web", &on))
            .with_unit(waiter("proc", &off).with_config_key("plugins", "proc"))
            .build();
        request_exit_later(&sup);

        assert_eq!(sup.run(&settings).await, 0);
        assert!(on.load(Ordering::SeqCst));
        assert!(!off.load(Ordering::SeqCst));
        assert_eq!(rec.units(EventKind::UnitDisabled), vec!["proc"]);
        assert_eq!(rec.units(EventKind::UnitLaunched), vec!["web"]);
        assert_eq!(rec.units(EventKind::UnitCancelled), vec!["web"]);
    }

    #[tokio::test]
    async fn test_check_only_initializes_but_launches_nothing() {
        let rec = Recorder::new();
        let ran = Arc::new(AtomicBool::new(false));

        let sup = Supervisor::builder(Config {
            check_only: true,
            ..cfg()
        })
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .with_unit(waiter("a", &ran).with_init(|_| Ok(())))
        .build();

        assert_eq!(sup.run(&Settings::new()).await, 1);
        assert_eq!(rec.count(EventKind::UnitInitialized), 1);
        assert_eq!(rec.count(EventKind::CheckOnlyCompleted), 1);
        assert_eq!(rec.count(EventKind::UnitLaunched), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unit_can_request_exit() {
        let rec = Recorder::new();
        let fatal = UnitSpec::new(UnitFn::arc("watchdog", |ctx: UnitContext| async move {
            ctx.shutdown().request_exit();
            Err::<(), _>(UnitError::fatal("lost required resource"))
        }));

        let sup = Supervisor::builder(cfg())
            .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
            .with_unit(fatal)
            .build();

        let code = tokio::time::timeout(Duration::from_secs(10), sup.run(&Settings::new()))
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(rec.count(EventKind::Terminated), 1);
    }

    #[tokio::test]
    async fn test_launch_failures_do_not_block_shutdown() {
        let rec = Recorder::new();
        let ran = Arc::new(AtomicBool::new(false));

        let sup = Supervisor::builder(Config {
            stack_size: 1 << 62,
            ..cfg()
        })
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .with_units(vec![waiter("a", &ran), waiter("b", &ran)])
        .build();
        request_exit_later(&sup);

        assert_eq!(sup.run(&Settings::new()).await, 0);
        assert_eq!(rec.count(EventKind::UnitLaunchFailed), 2);
        assert_eq!(rec.count(EventKind::UnitCancelled), 0);
        let unblocked = rec
            .events()
            .into_iter()
            .find(|e| e.kind == EventKind::SignalsUnblocked)
            .unwrap();
        assert_eq!(unblocked.count, Some(0));
    }
}
