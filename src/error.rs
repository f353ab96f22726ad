//! Error types used by the unitvisor runtime and its units.
//!
//! This module defines three enums:
//!
//! - [`StartupError`]: fatal-startup failures raised before any unit runs.
//! - [`UnitError`]: errors returned by a unit's init or run routine.
//! - [`LaunchError`]: an isolated failure to start one unit.
//!
//! All of them provide `as_label` (stable snake_case label for logs).
//! Shutdown itself has no error type: every shutdown step runs regardless of
//! the outcome of the previous one.

use std::path::PathBuf;

use thiserror::Error;

/// # Fatal-startup errors.
///
/// Raised while the process is being prepared, before any unit has been
/// launched. The supervisor reacts by terminating with [`StartupError::exit_code`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StartupError {
    /// A required directory cannot be entered or listed.
    #[error("cannot examine required {name} directory '{}': {source}", path.display())]
    DirectoryInaccessible {
        /// Logical name of the directory (`config`, `log`, ...).
        name: String,
        /// Configured path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be read.
    #[error("cannot load configuration file '{}': {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not a valid settings document.
    #[error("invalid configuration file '{}': {reason}", path.display())]
    ConfigParse { path: PathBuf, reason: String },

    /// A command-line `section/option=value` override is malformed.
    #[error("invalid configuration override: {reason}")]
    InvalidOverride { reason: String },

    /// Two units were registered under the same name.
    #[error("unit '{name}' is registered twice")]
    DuplicateUnit { name: String },

    /// A unit's init routine reported an unrecoverable setup error.
    #[error("unit '{unit}' failed to initialize: {source}")]
    UnitInit {
        unit: String,
        #[source]
        source: UnitError,
    },

    /// The pid-file could not be written.
    #[error("cannot write pid file '{}': {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Signal handlers could not be installed.
    #[error("cannot install signal handlers: {source}")]
    SignalSetup {
        #[source]
        source: std::io::Error,
    },

    /// The control thread's runtime could not be built.
    #[error("cannot start runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use unitvisor::StartupError;
    ///
    /// let err = StartupError::DuplicateUnit { name: "web".into() };
    /// assert_eq!(err.as_label(), "startup_duplicate_unit");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StartupError::DirectoryInaccessible { .. } => "startup_directory_inaccessible",
            StartupError::ConfigLoad { .. } => "startup_config_load",
            StartupError::ConfigParse { .. } => "startup_config_parse",
            StartupError::InvalidOverride { .. } => "startup_invalid_override",
            StartupError::DuplicateUnit { .. } => "startup_duplicate_unit",
            StartupError::UnitInit { .. } => "startup_unit_init",
            StartupError::PidFile { .. } => "startup_pid_file",
            StartupError::SignalSetup { .. } => "startup_signal_setup",
            StartupError::Runtime { .. } => "startup_runtime",
        }
    }

    /// Process exit code for this failure. Always non-zero.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// # Errors produced by unit routines.
///
/// Returned by a unit's init routine (any error there is fatal-startup) and by
/// its run routine (logged; units are never restarted).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UnitError {
    /// Unrecoverable error; during init it aborts startup.
    #[error("fatal error: {error}")]
    Fatal { error: String },

    /// The unit stopped because of an error.
    #[error("execution failed: {error}")]
    Failed { error: String },

    /// The unit observed cancellation and stopped.
    #[error("unit cancelled")]
    Canceled,
}

impl UnitError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use unitvisor::UnitError;
    ///
    /// let err = UnitError::Failed { error: "boom".into() };
    /// assert_eq!(err.as_label(), "unit_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            UnitError::Fatal { .. } => "unit_fatal",
            UnitError::Failed { .. } => "unit_failed",
            UnitError::Canceled => "unit_canceled",
        }
    }

    /// Shorthand for [`UnitError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        UnitError::Fatal { error: error.into() }
    }

    /// Shorthand for [`UnitError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        UnitError::Failed { error: error.into() }
    }
}

/// # Failure to start one unit.
///
/// Isolated: the launcher logs it, leaves the unit without a task handle and
/// moves on to the next unit.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The OS refused to create the unit's thread.
    #[error("failed to create thread for unit '{unit}': {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Spawn { .. } => "launch_spawn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        let err = StartupError::DirectoryInaccessible {
            name: "log".into(),
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_ne!(err.exit_code(), 0);
        assert_eq!(err.as_label(), "startup_directory_inaccessible");
        assert!(err.to_string().contains("/nonexistent"));
    }

    #[test]
    fn test_unit_init_wraps_source() {
        let err = StartupError::UnitInit {
            unit: "web".into(),
            source: UnitError::fatal("no socket"),
        };
        assert_eq!(err.to_string(), "unit 'web' failed to initialize: fatal error: no socket");
    }
}
