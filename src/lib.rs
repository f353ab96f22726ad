//! # unitvisor
//!
//! **Unitvisor** is the lifecycle supervisor of a long-running agent.
//!
//! It owns a static registry of named units (internal workers, each on its
//! own thread), decides which are enabled, launches them with signals
//! blocked, and drives a coordinated shutdown when an OS signal or an
//! internal fatal condition sets the exit-requested latch.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   UnitSpec   │   │   UnitSpec   │   │   UnitSpec   │
//!     │  (unit #1)   │   │  (unit #2)   │   │  (unit #3)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - Registry (ordered units, enablement, init)                     │
//! │  - Launcher (detached threads, uniform stack size)                │
//! │  - SignalRouter (atomic flags in ShutdownContext)                 │
//! │  - Orchestrator (DRAINING → REAPING → TERMINATED)                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │ unit thread  │   │ unit thread  │   │ unit thread  │   │
//!     │ (own runtime)│   │ (own runtime)│   │ (own runtime)│   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ UnitStopped      │ UnitFailed       │ track_process   │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                          listener ─► SubscriberSet ─► LogWriter, ...
//! ```
//!
//! ### Shutdown
//! ```text
//! SIGTERM ──► flag store (handler) ──► control loop wakes ──► exit-requested?
//!                                                                │ yes (once)
//!   DRAINING:   cancel units, cancel clients, SIGTERM helpers    ▼
//!   REAPING:    safe_signal(SIGTERM) + reap(pid) per unit process, sweep
//!   TERMINATED: persist storage, remove pid-file, exit code
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                        |
//! |-------------------|----------------------------------------------------------|-------------------------------------------|
//! | **Units**         | Define units as trait objects or closures.               | [`Unit`], [`UnitFn`], [`UnitSpec`]        |
//! | **Supervision**   | Startup, launch, control loop, shutdown.                 | [`Supervisor`], [`SupervisorBuilder`]     |
//! | **Signals**       | Deferred reaction to OS signals.                         | [`ShutdownContext`], [`signals`]          |
//! | **Processes**     | Safe signalling and reaping of external processes.      | [`process`]                               |
//! | **Subscriber API**| Hook into lifecycle events.                              | [`Subscribe`], [`Event`], [`EventKind`]   |
//! | **Errors**        | Typed errors for startup, units and launch.              | [`StartupError`], [`UnitError`]           |
//! | **Configuration** | Settings store and supervisor config.                    | [`Settings`], [`Config`]                  |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] rendering events through `tracing`.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use unitvisor::{Config, Settings, Supervisor, UnitContext, UnitError, UnitFn, UnitSpec};
//!
//! fn main() {
//!     let settings = Settings::new();
//!     let cfg = Config::from_settings(&settings);
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn unitvisor::Subscribe>> = vec![Arc::new(unitvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn unitvisor::Subscribe>> = Vec::new();
//!
//!     let collector = UnitSpec::new(UnitFn::arc("collector", |ctx: UnitContext| async move {
//!         ctx.cancelled().await;
//!         Ok::<_, UnitError>(())
//!     }))
//!     .with_config_key("plugins", "collector");
//!
//!     let sup = Supervisor::builder(cfg)
//!         .with_subscribers(subs)
//!         .with_unit(collector)
//!         .build();
//!
//!     let rt = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()
//!         .unwrap();
//!     std::process::exit(rt.block_on(sup.run(&settings)));
//! }
//! ```
mod config;
mod context;
mod core;
mod error;
mod events;
mod startup;
mod storage;
mod subscribers;
mod units;

// ---- Public re-exports ----

pub use config::{
    Config, GLOBAL, PID_FILE_OPTION, REAP_TIMEOUT_OPTION, RequiredDir, STACK_SIZE_OPTION, Settings,
};
pub use context::ShutdownContext;
pub use crate::core::{Supervisor, SupervisorBuilder};
pub use crate::core::{clients, launcher, process, registry, shutdown, signals};
pub use error::{LaunchError, StartupError, UnitError};
pub use events::{Bus, Event, EventKind};
pub use startup::{remove_pid_file, verify_directories, verify_required_directory, write_pid_file};
pub use storage::{NoStorage, Storage};
pub use subscribers::{Subscribe, SubscriberSet};
pub use units::{ConfigKey, InitFn, Unit, UnitContext, UnitFn, UnitRef, UnitSpec};

// Optional: expose the built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
