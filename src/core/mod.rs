//! Runtime core: registry, launch, signals and shutdown.
//!
//! The entry point is [`Supervisor`], built with [`SupervisorBuilder`].
//!
//! Internal modules:
//! - [`registry`]: ordered unit list, enablement resolution and init;
//! - [`launcher`]: one detached thread per enabled unit, uniform stack size;
//! - [`signals`]: signal masking and the flag-storing signal router;
//! - [`process`]: safe signalling, pid-bound reaping, the process table;
//! - [`clients`]: per-connection handles owned by serving units;
//! - [`shutdown`]: the DRAINING → REAPING → TERMINATED orchestrator;
//! - [`supervisor`]: wires everything into one process run.

mod builder;
pub mod clients;
pub mod launcher;
pub mod process;
pub mod registry;
pub mod shutdown;
pub mod signals;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use supervisor::Supervisor;
