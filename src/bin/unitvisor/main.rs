//! `unitvisor` agent binary.
//!
//! Loads the settings document, applies command-line overrides, builds the
//! agent's units and hands the control thread to the supervisor. The exit
//! code is whatever the supervisor's shutdown produced.

mod agent;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unitvisor::{
    Config, GLOBAL, LogWriter, PID_FILE_OPTION, STACK_SIZE_OPTION, Settings, StartupError, Subscribe,
    Supervisor,
};

/// Lifecycle supervisor for the monitoring agent.
#[derive(Parser, Debug)]
#[command(name = "unitvisor", version, about, long_about = None)]
struct Args {
    /// Settings document (JSON). A missing file means built-in defaults.
    #[arg(short = 'c', long = "config", default_value = "/etc/unitvisor/unitvisor.json")]
    config: PathBuf,

    /// Write the process id to this file; removed at shutdown.
    #[arg(short = 'P', long = "pid-file")]
    pid_file: Option<PathBuf>,

    /// Initialize everything, launch nothing and exit non-zero.
    #[arg(short = 'k', long = "check-config")]
    check_config: bool,

    /// Unit thread stack size in bytes (never below the platform default).
    #[arg(long = "stack-size")]
    stack_size: Option<u64>,

    /// Override a setting, e.g. `-o plugins/tc=no`. Repeatable.
    #[arg(short = 'o', long = "set", value_name = "SECTION/OPTION=VALUE")]
    set: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!(label = err.as_label(), "{err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32, StartupError> {
    let settings = load_settings(&args)?;
    let mut cfg = Config::from_settings(&settings);
    cfg.check_only = args.check_config;

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = Supervisor::builder(cfg)
        .with_subscribers(subs)
        .with_units(agent::units(&settings))
        .build();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| StartupError::Runtime { source })?;
    Ok(rt.block_on(sup.run(&settings)))
}

fn load_settings(args: &Args) -> Result<Settings, StartupError> {
    let mut settings = match Settings::load(&args.config) {
        Ok(s) => s,
        Err(StartupError::ConfigLoad { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            info!(path = %args.config.display(), "no configuration file, using defaults");
            Settings::new()
        }
        Err(e) => return Err(e),
    };

    for spec in &args.set {
        settings
            .apply_override(spec)
            .map_err(|reason| StartupError::InvalidOverride { reason })?;
    }
    if let Some(path) = &args.pid_file {
        settings.set(GLOBAL, PID_FILE_OPTION, path.display().to_string());
    }
    if let Some(bytes) = args.stack_size {
        settings.set(GLOBAL, STACK_SIZE_OPTION, bytes);
    }
    Ok(settings)
}
