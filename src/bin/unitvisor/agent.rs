//! The agent's own units.
//!
//! | Unit         | Enabled by                    | Default | Does                                         |
//! |--------------|-------------------------------|---------|----------------------------------------------|
//! | `idlejitter` | `plugins / idlejitter`        | yes     | measures scheduler wake-up jitter            |
//! | `housekeeping` | always                      | yes     | consumes reopen-logs / save-now / reload-health |
//! | `plugins.d`  | `plugins / plugins.d`         | yes     | runs external plugin commands (reaped at shutdown) |
//! | `tc`         | `plugins / tc`                | no      | runs the QoS helper (terminated while draining) |

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use serde_json::Value;
use tracing::{debug, info, warn};
use unitvisor::process::{TrackClosed, reap};
use unitvisor::{Settings, UnitContext, UnitError, UnitFn, UnitSpec};

const PLUGINS: &str = "plugins";
const JITTER_SLEEP: Duration = Duration::from_millis(20);
const CHILD_POLL: Duration = Duration::from_secs(1);
const HELPER_RESPAWN: Duration = Duration::from_secs(10);
const LATE_REAP: Duration = Duration::from_secs(5);

/// Builds the registry in launch order.
pub fn units(settings: &Settings) -> Vec<UnitSpec> {
    vec![
        idlejitter(),
        housekeeping(),
        plugins_d(plugin_commands(settings)),
        tc(settings.get_str(
            PLUGINS,
            "tc helper command",
            "/usr/libexec/unitvisor/plugins.d/tc-qos-helper.sh",
        )),
    ]
}

fn idlejitter() -> UnitSpec {
    UnitSpec::new(UnitFn::arc("idlejitter", |ctx: UnitContext| async move {
        let mut window = Instant::now();
        let (mut max, mut total, mut samples) = (Duration::ZERO, Duration::ZERO, 0u32);
        while !ctx.is_cancelled() {
            let started = Instant::now();
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(JITTER_SLEEP) => {}
            }
            let jitter = started.elapsed().saturating_sub(JITTER_SLEEP);
            max = max.max(jitter);
            total += jitter;
            samples += 1;

            if window.elapsed() >= Duration::from_secs(1) {
                debug!(
                    max_us = max.as_micros() as u64,
                    avg_us = (total / samples).as_micros() as u64,
                    "idle jitter"
                );
                (max, total, samples) = (Duration::ZERO, Duration::ZERO, 0);
                window = Instant::now();
            }
        }
        Ok::<_, UnitError>(())
    }))
    .with_category(PLUGINS)
    .with_config_key(PLUGINS, "idlejitter")
}

fn housekeeping() -> UnitSpec {
    UnitSpec::new(UnitFn::arc("housekeeping", |ctx: UnitContext| async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tick.tick() => {}
            }
            let flags = ctx.shutdown();
            if flags.take_reopen_logs() {
                // Output goes to stdout; nothing to reopen.
                info!("reopen logs requested");
            }
            if flags.take_save_now() {
                info!("save requested");
            }
            if flags.take_reload_health() {
                info!("health reload requested");
            }
        }
        Ok::<_, UnitError>(())
    }))
}

fn plugin_commands(settings: &Settings) -> Vec<String> {
    settings
        .get("plugins.d", "commands")
        .and_then(Value::as_array)
        .map(|cmds| cmds.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn plugins_d(commands: Vec<String>) -> UnitSpec {
    UnitSpec::new(UnitFn::arc("plugins.d", move |ctx: UnitContext| {
        let commands = commands.clone();
        async move {
            let mut running = Vec::new();
            for cmd in &commands {
                match spawn_shell(cmd, &ctx) {
                    Ok(child) => {
                        let pid = Pid::from_raw(child.id() as i32);
                        match ctx.track_process(pid).await {
                            Ok(id) => {
                                info!(command = %cmd, pid = child.id(), "plugin started");
                                running.push((id, child));
                            }
                            Err(closed) => {
                                collect_untracked("plugin", pid, closed).await;
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(command = %cmd, error = %e, "cannot start plugin"),
                }
            }

            // Collect plugins that exit on their own; the rest are reaped at shutdown.
            while !running.is_empty() {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(CHILD_POLL) => {}
                }
                if ctx.is_cancelled() {
                    break;
                }
                let mut still = Vec::with_capacity(running.len());
                for (id, mut child) in running {
                    match child.try_wait() {
                        Ok(None) => still.push((id, child)),
                        Ok(Some(status)) => {
                            ctx.release_process(id).await;
                            warn!(pid = child.id(), %status, "plugin exited");
                        }
                        Err(e) => {
                            ctx.release_process(id).await;
                            warn!(pid = child.id(), error = %e, "lost track of plugin");
                        }
                    }
                }
                running = still;
            }
            ctx.cancelled().await;
            Ok::<_, UnitError>(())
        }
    }))
    .with_category(PLUGINS)
    .with_config_key(PLUGINS, "plugins.d")
}

fn tc(command: String) -> UnitSpec {
    UnitSpec::new(UnitFn::arc("tc", move |ctx: UnitContext| {
        let command = command.clone();
        async move {
            while !ctx.is_cancelled() {
                let mut child = spawn_shell(&command, &ctx)
                    .map_err(|e| UnitError::failed(format!("cannot run '{command}': {e}")))?;
                let pid = Pid::from_raw(child.id() as i32);
                let id = match ctx.track_helper("tc-qos-helper", pid).await {
                    Ok(id) => id,
                    Err(closed) => {
                        collect_untracked("tc helper", pid, closed).await;
                        break;
                    }
                };

                // Ownership passes to the orchestrator once cancellation is observed.
                loop {
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(CHILD_POLL) => {}
                    }
                    match child.try_wait() {
                        Ok(None) => continue,
                        Ok(Some(status)) => warn!(%status, "tc helper exited"),
                        Err(e) => warn!(error = %e, "lost track of tc helper"),
                    }
                    ctx.release_process(id).await;
                    break;
                }

                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(HELPER_RESPAWN) => {}
                }
            }
            Ok::<_, UnitError>(())
        }
    }))
    .with_category(PLUGINS)
    .with_config_key(PLUGINS, "tc")
    .enabled_by_default(false)
}

/// Collects a child that was started after shutdown had already claimed its kind.
async fn collect_untracked(what: &'static str, pid: Pid, closed: TrackClosed) {
    warn!(pid = pid.as_raw(), delivery = ?closed.delivery, "{what} started during shutdown");
    match tokio::task::spawn_blocking(move || reap(pid, Some(LATE_REAP))).await {
        Ok(report) => debug!(pid = pid.as_raw(), outcome = %report.outcome, "{what} collected"),
        Err(e) => warn!(pid = pid.as_raw(), error = %e, "cannot collect {what}"),
    }
}

/// Runs `cmd` through `sh -c` with the verified directories in its environment.
fn spawn_shell(cmd: &str, ctx: &UnitContext) -> std::io::Result<Child> {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .envs(ctx.helper_env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .spawn()
}
