//! # Runtime configuration.
//!
//! Two layers:
//! - [`Settings`]: the (section, option) → value store the agent's configuration
//!   file is loaded into. Units resolve their enablement from it.
//! - [`Config`]: centralized supervisor settings derived from [`Settings`]
//!   (or built directly when the crate is used as a library).
//!
//! ## Sentinel values
//! - `stack_size = 0` → no override (platform default only)
//! - `reap_timeout = 0s` → pid-bound waits have no deadline
//! - `pid_file = None` → no pid-file is written or removed

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::error::StartupError;

/// Section holding the supervisor's own options.
pub const GLOBAL: &str = "global";

/// Option under [`GLOBAL`] carrying the thread stack size override, in bytes.
pub const STACK_SIZE_OPTION: &str = "pthread stack size";

/// Option under [`GLOBAL`] carrying the pid-file path.
pub const PID_FILE_OPTION: &str = "pid file";

/// Option under [`GLOBAL`] carrying the reap deadline, in seconds.
pub const REAP_TIMEOUT_OPTION: &str = "reap timeout seconds";

/// Required directories as `(name, environment variable, default path)`.
const DIRECTORIES: &[(&str, &str, &str)] = &[
    ("config", "UNITVISOR_CONFIG_DIR", "/etc/unitvisor"),
    ("plugins", "UNITVISOR_PLUGINS_DIR", "/usr/libexec/unitvisor/plugins.d"),
    ("web", "UNITVISOR_WEB_DIR", "/usr/share/unitvisor/web"),
    ("cache", "UNITVISOR_CACHE_DIR", "/var/cache/unitvisor"),
    ("lib", "UNITVISOR_LIB_DIR", "/var/lib/unitvisor"),
    ("log", "UNITVISOR_LOG_DIR", "/var/log/unitvisor"),
    ("home", "HOME", "/var/cache/unitvisor"),
];

/// Configuration store keyed by (section, option).
///
/// Loaded from a JSON document whose top level maps section names to objects
/// of options:
///
/// ```rust
/// use unitvisor::Settings;
///
/// let s = Settings::from_json(r#"{ "plugins": { "proc": "no", "tc": true } }"#).unwrap();
/// assert!(!s.get_bool("plugins", "proc", true));
/// assert!(s.get_bool("plugins", "tc", false));
/// assert!(s.get_bool("plugins", "cgroups", true)); // absent → default
/// ```
#[derive(Clone, Debug, Default)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Settings {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a settings document from disk.
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let text = std::fs::read_to_string(path).map_err(|source| StartupError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|reason| StartupError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parses a settings document.
    pub fn from_json(text: &str) -> Result<Self, String> {
        let root: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let Value::Object(root) = root else {
            return Err("top level must be an object of sections".to_string());
        };

        let mut settings = Settings::new();
        for (section, options) in root {
            let Value::Object(options) = options else {
                return Err(format!("section '{section}' must be an object"));
            };
            let entry = settings.sections.entry(section).or_default();
            entry.extend(options);
        }
        Ok(settings)
    }

    /// Sets or replaces a value.
    pub fn set(&mut self, section: &str, option: &str, value: impl Into<Value>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.into());
    }

    /// Applies a `section/option=value` override (command line form).
    pub fn apply_override(&mut self, spec: &str) -> Result<(), String> {
        let (key, value) = spec
            .split_once('=')
            .ok_or_else(|| format!("override '{spec}' is not section/option=value"))?;
        let (section, option) = key
            .split_once('/')
            .ok_or_else(|| format!("override key '{key}' is not section/option"))?;
        let (section, option) = (section.trim(), option.trim());
        if section.is_empty() || option.is_empty() {
            return Err(format!("override key '{key}' has an empty part"));
        }
        self.set(section, option, value.trim());
        Ok(())
    }

    /// Raw value, if present.
    pub fn get(&self, section: &str, option: &str) -> Option<&Value> {
        self.sections.get(section)?.get(option)
    }

    /// True if the key is present.
    pub fn contains(&self, section: &str, option: &str) -> bool {
        self.get(section, option).is_some()
    }

    /// Boolean value, or `default` when absent or unparsable.
    ///
    /// Accepts JSON booleans, numbers (non-zero is true) and the strings
    /// `yes/no`, `true/false`, `on/off`, `1/0`.
    pub fn get_bool(&self, section: &str, option: &str, default: bool) -> bool {
        match self.get(section, option) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "on" | "1" => true,
                "no" | "false" | "off" | "0" => false,
                _ => {
                    tracing::warn!(section, option, value = %s, default, "not a boolean, using default");
                    default
                }
            },
            Some(other) => {
                tracing::warn!(section, option, value = %other, default, "not a boolean, using default");
                default
            }
        }
    }

    /// Integer value, or `default` when absent or unparsable.
    pub fn get_number(&self, section: &str, option: &str, default: i64) -> i64 {
        match self.get(section, option) {
            None => default,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(section, option, value = %s, default, "not a number, using default");
                default
            }),
            Some(other) => {
                tracing::warn!(section, option, value = %other, default, "not a number, using default");
                default
            }
        }
    }

    /// String value, or `default` when absent. Non-string scalars are rendered.
    pub fn get_str(&self, section: &str, option: &str, default: &str) -> String {
        match self.get(section, option) {
            None | Some(Value::Null) => default.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// A directory that must be accessible before any unit starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequiredDir {
    /// Logical name (`config`, `log`, ...).
    pub name: String,
    /// Environment variable exported to helper processes.
    pub env: String,
    /// Configured path.
    pub path: PathBuf,
}

/// Supervisor configuration.
///
/// ## Field semantics
/// - `stack_size`: unit thread stack override in bytes (`0` = none; never shrinks the platform default)
/// - `pid_file`: pid-file written at startup and removed at shutdown
/// - `check_only`: initialize everything, launch nothing, exit non-zero
/// - `reap_timeout`: deadline for the pid-bound wait (`0s` = unbounded)
/// - `sweep_orphans`: non-blocking collection of unaccounted children after reaping
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `directories`: required directories, verified in order
#[derive(Clone, Debug)]
pub struct Config {
    pub stack_size: usize,
    pub pid_file: Option<PathBuf>,
    pub check_only: bool,
    pub reap_timeout: Duration,
    pub sweep_orphans: bool,
    pub bus_capacity: usize,
    pub directories: Vec<RequiredDir>,
}

impl Config {
    /// Derives the configuration from loaded settings.
    ///
    /// Every standard directory is required, with its `global / <name> directory`
    /// option falling back to the packaged default.
    pub fn from_settings(settings: &Settings) -> Self {
        let stack_size = settings.get_number(GLOBAL, STACK_SIZE_OPTION, 0).max(0) as usize;
        let pid_file = Some(settings.get_str(GLOBAL, PID_FILE_OPTION, ""))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let reap_secs = settings.get_number(GLOBAL, REAP_TIMEOUT_OPTION, 0).max(0) as u64;

        let directories = DIRECTORIES
            .iter()
            .map(|(name, env, default)| RequiredDir {
                name: (*name).to_string(),
                env: (*env).to_string(),
                path: PathBuf::from(settings.get_str(GLOBAL, &format!("{name} directory"), default)),
            })
            .collect();

        Self {
            stack_size,
            pid_file,
            reap_timeout: Duration::from_secs(reap_secs),
            directories,
            ..Self::default()
        }
    }

    /// Returns the stack size override as an `Option`.
    #[inline]
    pub fn stack_override(&self) -> Option<usize> {
        if self.stack_size == 0 {
            None
        } else {
            Some(self.stack_size)
        }
    }

    /// Returns the reap deadline as an `Option`.
    #[inline]
    pub fn reap_deadline(&self) -> Option<Duration> {
        if self.reap_timeout == Duration::ZERO {
            None
        } else {
            Some(self.reap_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - no stack override, no pid-file, no required directories
    /// - `check_only = false`
    /// - `reap_timeout = 0s` (unbounded pid-bound wait)
    /// - `sweep_orphans = true`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            stack_size: 0,
            pid_file: None,
            check_only: false,
            reap_timeout: Duration::ZERO,
            sweep_orphans: true,
            bus_capacity: 1024,
            directories: Vec::new(),
        }
    }
}
