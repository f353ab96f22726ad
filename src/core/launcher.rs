//! # Thread launcher.
//!
//! Gives each enabled unit its own OS thread. The thread builds a
//! single-threaded runtime and drives [`Unit::run`](crate::Unit::run) to
//! completion; the `JoinHandle` is dropped right away, so nobody ever waits
//! for a unit thread.
//!
//! ## Stack size
//! Computed once per process run as `max(platform default, override)` and
//! applied to every launch. An override smaller than the platform default
//! never shrinks it.
//!
//! ## Outcomes published
//! - `UnitLaunched` (with `stack_size`) when the thread exists;
//! - `UnitLaunchFailed` when the OS refuses it (isolated: the caller moves on);
//! - `UnitStopped` / `UnitFailed` from the unit thread itself when `run` returns or panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::{LaunchError, UnitError};
use crate::events::{Bus, Event, EventKind};
use crate::units::{UnitContext, UnitRef, UnitSpec};

/// Stack size of spawned threads when `RUST_MIN_STACK` is unset.
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Stack size the platform would give a new thread.
///
/// Honors `RUST_MIN_STACK` the way `std::thread` does.
pub fn platform_default_stack_size() -> usize {
    std::env::var("RUST_MIN_STACK")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_STACK_SIZE)
}

/// `max(platform, override)`.
///
/// ```
/// use unitvisor::launcher::resolve_stack_size;
///
/// assert_eq!(resolve_stack_size(8 << 20, Some(1 << 20)), 8 << 20);
/// assert_eq!(resolve_stack_size(8 << 20, Some(16 << 20)), 16 << 20);
/// assert_eq!(resolve_stack_size(8 << 20, None), 8 << 20);
/// ```
pub fn resolve_stack_size(platform: usize, override_bytes: Option<usize>) -> usize {
    override_bytes.map_or(platform, |o| o.max(platform))
}

/// Owner-side handle of a launched unit: a way to ask it to stop.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    cancel: CancellationToken,
}

impl UnitHandle {
    /// Requests cooperative cancellation; does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Starts detached unit threads with a uniform stack size.
pub struct Launcher {
    stack_size: usize,
    bus: Bus,
}

impl Launcher {
    pub fn new(stack_size: usize, bus: Bus) -> Self {
        Self { stack_size, bus }
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Spawns the unit's thread and returns its handle.
    ///
    /// On error nothing was started and the caller leaves the entry without a handle.
    pub fn launch(&self, spec: &UnitSpec, ctx: UnitContext) -> Result<UnitHandle, LaunchError> {
        let unit = Arc::clone(spec.unit());
        let name = unit.name().to_string();
        let cancel = ctx.token().clone();
        let bus = self.bus.clone();

        let spawned = thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || run_unit(unit, ctx, bus));

        match spawned {
            // Dropping the JoinHandle detaches the thread.
            Ok(_detached) => {
                self.bus.publish(
                    Event::new(EventKind::UnitLaunched)
                        .with_unit(name.as_str())
                        .with_stack_size(self.stack_size),
                );
                Ok(UnitHandle { cancel })
            }
            Err(source) => {
                let err = LaunchError::Spawn { unit: name, source };
                self.bus.publish(
                    Event::new(EventKind::UnitLaunchFailed)
                        .with_unit(spec.name())
                        .with_reason(err.to_string()),
                );
                Err(err)
            }
        }
    }
}

/// Body of a unit thread.
fn run_unit(unit: UnitRef, ctx: UnitContext, bus: Bus) {
    let name = unit.name().to_string();
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            bus.publish(
                Event::new(EventKind::UnitFailed)
                    .with_unit(name)
                    .with_reason(format!("runtime: {e}")),
            );
            return;
        }
    };

    let res = rt.block_on(AssertUnwindSafe(unit.run(ctx)).catch_unwind());
    let ev = match res {
        Ok(Ok(())) | Ok(Err(UnitError::Canceled)) => Event::new(EventKind::UnitStopped),
        Ok(Err(e)) => Event::new(EventKind::UnitFailed).with_reason(e.to_string()),
        Err(_) => Event::new(EventKind::UnitFailed).with_reason("unit_panic"),
    };
    bus.publish(ev.with_unit(name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::context::ShutdownContext;
    use crate::core::clients::ClientTable;
    use crate::core::process::ProcessTable;
    use crate::units::UnitFn;

    fn ctx(name: &str) -> UnitContext {
        UnitContext::new(
            Arc::from(name),
            CancellationToken::new(),
            ShutdownContext::new(),
            ProcessTable::new(),
            ClientTable::new(),
            Arc::from(Vec::new()),
        )
    }

    #[test]
    fn test_override_never_shrinks_platform_default() {
        let platform = 8 * 1024 * 1024;
        assert_eq!(resolve_stack_size(platform, Some(64 * 1024)), platform);
        assert_eq!(resolve_stack_size(platform, Some(platform + 1)), platform + 1);
    }

    #[tokio::test]
    async fn test_launched_unit_runs_until_cancelled() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let launcher = Launcher::new(DEFAULT_STACK_SIZE, bus.clone());

        let spec = UnitSpec::new(UnitFn::arc("waiter", |ctx: UnitContext| async move {
            ctx.cancelled().await;
            Err::<(), _>(UnitError::Canceled)
        }));
        let handle = launcher.launch(&spec, ctx("waiter")).unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::UnitLaunched);
        assert_eq!(ev.stack_size, Some(DEFAULT_STACK_SIZE));

        handle.cancel();
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind, EventKind::UnitStopped);
        assert_eq!(ev.unit.as_deref(), Some("waiter"));
    }

    #[tokio::test]
    async fn test_panicking_unit_is_reported() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let launcher = Launcher::new(DEFAULT_STACK_SIZE, bus.clone());

        let spec = UnitSpec::new(UnitFn::arc("boom", |_ctx: UnitContext| async move {
            if true {
                panic!("boom");
            }
            Ok::<_, UnitError>(())
        }));
        launcher.launch(&spec, ctx("boom")).unwrap();

        // The thread may report before the launcher does.
        let failed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ev = rx.recv().await.unwrap();
                if ev.kind == EventKind::UnitFailed {
                    break ev;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(failed.reason.as_deref(), Some("unit_panic"));
    }

    #[test]
    fn test_spawn_failure_is_isolated() {
        let bus = Bus::new(16);
        let launcher = Launcher::new(1 << 62, bus);
        let spec = UnitSpec::new(UnitFn::arc("huge", |_ctx: UnitContext| async {
            Ok::<_, UnitError>(())
        }));
        let err = launcher.launch(&spec, ctx("huge")).unwrap_err();
        assert_eq!(err.as_label(), "launch_spawn");
    }
}
