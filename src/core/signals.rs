//! # Signal router.
//!
//! Splits every handled signal into "notify" and "react":
//! - **notify** runs in signal context and is a single atomic store into the
//!   [`ShutdownContext`] (installed with `signal_hook::flag::register`);
//! - **react** runs in the supervisor's control loop, woken by the
//!   corresponding tokio signal stream, and never inside the handler.
//!
//! | Signal                      | Flag              | Reaction                          |
//! |-----------------------------|-------------------|-----------------------------------|
//! | `SIGINT` `SIGTERM` `SIGQUIT` | exit-requested    | control loop drives the orchestrator |
//! | `SIGHUP`                    | reopen-logs       | delegated (log collaborator)       |
//! | `SIGUSR1`                   | save-now          | delegated (storage collaborator)   |
//! | `SIGUSR2`                   | reload-health     | delegated (health collaborator)    |
//!
//! ## Masking
//! [`block`] is called on the control thread before any unit thread exists, so
//! every unit thread inherits the mask and never runs a reaction. [`unblock`]
//! is called on the control thread once every enabled unit was launched.

use std::io;
use std::sync::Arc;

use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask};
use signal_hook::SigId;
use tokio::signal::unix::{self, SignalKind};

use crate::context::ShutdownContext;
use crate::error::StartupError;

/// Signals routed into the shutdown context.
pub const HANDLED: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGHUP,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Signal set of [`HANDLED`].
pub fn handled() -> SigSet {
    let mut set = SigSet::empty();
    for sig in HANDLED {
        set.add(sig);
    }
    set
}

/// Blocks the handled signals on the calling thread (and threads it spawns afterwards).
pub fn block() -> Result<(), StartupError> {
    mask(SigmaskHow::SIG_BLOCK)
}

/// Unblocks the handled signals on the calling thread.
pub fn unblock() -> Result<(), StartupError> {
    mask(SigmaskHow::SIG_UNBLOCK)
}

fn mask(how: SigmaskHow) -> Result<(), StartupError> {
    pthread_sigmask(how, Some(&handled()), None).map_err(|errno| StartupError::SignalSetup {
        source: io::Error::from(errno),
    })
}

/// What woke the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Termination-class signal.
    Terminate,
    ReopenLogs,
    SaveNow,
    ReloadHealth,
    /// [`ShutdownContext::request_exit`] from normal context.
    Internal,
}

/// Installed signal handlers plus the streams that wake the control loop.
///
/// Dropping the router unregisters its flag handlers.
pub struct SignalRouter {
    ctx: Arc<ShutdownContext>,
    ids: Vec<SigId>,
    int: unix::Signal,
    term: unix::Signal,
    quit: unix::Signal,
    hup: unix::Signal,
    usr1: unix::Signal,
    usr2: unix::Signal,
}

impl SignalRouter {
    /// Registers the flag handlers and the wake-up streams.
    ///
    /// Must be called inside a tokio runtime with signal support.
    pub fn install(ctx: &Arc<ShutdownContext>) -> Result<Self, StartupError> {
        let setup = |source: io::Error| StartupError::SignalSetup { source };

        let routes = [
            (Signal::SIGINT, ctx.exit_flag()),
            (Signal::SIGTERM, ctx.exit_flag()),
            (Signal::SIGQUIT, ctx.exit_flag()),
            (Signal::SIGHUP, ctx.reopen_logs_flag()),
            (Signal::SIGUSR1, ctx.save_now_flag()),
            (Signal::SIGUSR2, ctx.reload_health_flag()),
        ];
        let mut ids = Vec::with_capacity(routes.len());
        for (sig, flag) in routes {
            match signal_hook::flag::register(sig as i32, flag) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        signal_hook::low_level::unregister(id);
                    }
                    return Err(setup(e));
                }
            }
        }

        let stream = |kind: SignalKind| unix::signal(kind).map_err(setup);
        Ok(Self {
            ctx: Arc::clone(ctx),
            ids,
            int: stream(SignalKind::interrupt())?,
            term: stream(SignalKind::terminate())?,
            quit: stream(SignalKind::quit())?,
            hup: stream(SignalKind::hangup())?,
            usr1: stream(SignalKind::user_defined1())?,
            usr2: stream(SignalKind::user_defined2())?,
        })
    }

    /// Waits for the next notification.
    ///
    /// For termination-class signals exit-requested is latched again here: when
    /// the signal landed on another thread its handler's store may not be visible yet.
    pub async fn next(&mut self) -> Notification {
        let n = tokio::select! {
            _ = self.int.recv() => Notification::Terminate,
            _ = self.term.recv() => Notification::Terminate,
            _ = self.quit.recv() => Notification::Terminate,
            _ = self.hup.recv() => Notification::ReopenLogs,
            _ = self.usr1.recv() => Notification::SaveNow,
            _ = self.usr2.recv() => Notification::ReloadHealth,
            _ = self.ctx.woken() => Notification::Internal,
        };
        if n == Notification::Terminate {
            self.ctx.request_exit();
        }
        n
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
