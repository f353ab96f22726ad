//! # Unit registry and enablement resolver.
//!
//! The registry is the fixed, ordered list of units known to the process.
//! Registration order is the resolution, initialization and launch order.
//! After startup nothing is added or removed; only the `enabled` flag and the
//! task handle of each entry change.
//!
//! ## Lifecycle of an entry
//! ```text
//! UnitSpec ──► resolve(settings) ──► enabled=false ──► UnitDisabled (never launched)
//!                                 └► enabled=true  ──► init(settings) ──► launch ──► handle=Some
//!                                                                                       │
//!                                        orchestrator DRAINING: handle.cancel(), enabled=false
//! ```
//!
//! ## Rules
//! - A handle is present only if the entry is enabled and its launch succeeded.
//! - Init errors are fatal-startup errors; they stop the remaining inits.

use std::collections::HashSet;

use crate::config::Settings;
use crate::core::launcher::UnitHandle;
use crate::error::StartupError;
use crate::events::{Bus, Event, EventKind};
use crate::units::UnitSpec;

/// Registry entry.
pub struct UnitEntry {
    spec: UnitSpec,
    enabled: bool,
    handle: Option<UnitHandle>,
}

impl UnitEntry {
    pub fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True once a task was created for this entry.
    pub fn is_launched(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn attach(&mut self, handle: UnitHandle) {
        self.handle = Some(handle);
    }

    /// Issues cancellation (if launched) and clears `enabled`.
    ///
    /// Returns `false` when the entry was already disabled, so nothing was done.
    pub(crate) fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(handle) = &self.handle {
            handle.cancel();
        }
        self.enabled = false;
        true
    }
}

/// Effective enablement of `spec` under `settings`.
///
/// Reads the unit's (section, option) key; falls back to the static default
/// when there is no key or the key is absent.
pub fn resolve(spec: &UnitSpec, settings: &Settings) -> bool {
    match spec.config_key() {
        Some(key) => settings.get_bool(&key.section, &key.option, spec.default_enabled()),
        None => spec.default_enabled(),
    }
}

/// Ordered registry of units.
#[derive(Default)]
pub struct Registry {
    entries: Vec<UnitEntry>,
}

impl Registry {
    /// Builds the registry; every entry starts disabled until [`Registry::resolve_all`].
    pub fn new(specs: Vec<UnitSpec>) -> Result<Self, StartupError> {
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if !seen.insert(spec.name().to_string()) {
                return Err(StartupError::DuplicateUnit {
                    name: spec.name().to_string(),
                });
            }
        }
        let entries = specs
            .into_iter()
            .map(|spec| UnitEntry {
                spec,
                enabled: false,
                handle: None,
            })
            .collect();
        Ok(Self { entries })
    }

    /// Resolves every entry's enabled flag, in registration order.
    pub fn resolve_all(&mut self, settings: &Settings, bus: &Bus) {
        for entry in &mut self.entries {
            entry.enabled = resolve(&entry.spec, settings);
            if !entry.enabled {
                bus.publish(Event::new(EventKind::UnitDisabled).with_unit(entry.name()));
            }
        }
    }

    /// Runs the init routine of every enabled entry, in registration order.
    pub fn initialize(&self, settings: &Settings, bus: &Bus) -> Result<(), StartupError> {
        for entry in self.entries.iter().filter(|e| e.enabled) {
            if let Some(init) = entry.spec.init() {
                init(settings).map_err(|source| StartupError::UnitInit {
                    unit: entry.name().to_string(),
                    source,
                })?;
            }
            bus.publish(Event::new(EventKind::UnitInitialized).with_unit(entry.name()));
        }
        Ok(())
    }

    pub fn entries(&self) -> &[UnitEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [UnitEntry] {
        &mut self.entries
    }

    pub fn get(&self, name: &str) -> Option<&UnitEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Names of enabled entries, in registration order.
    pub fn enabled(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    use crate::error::UnitError;
    use crate::units::{UnitContext, UnitFn};

    fn spec(name: &'static str) -> UnitSpec {
        UnitSpec::new(UnitFn::arc(name, |_ctx: UnitContext| async { Ok::<_, UnitError>(()) }))
    }

    #[test]
    fn test_resolve_uses_key_then_default() {
        let settings = Settings::from_json(r#"{ "plugins": { "proc": "no" } }"#).unwrap();

        let keyed = spec("proc").with_config_key("plugins", "proc");
        assert!(!resolve(&keyed, &settings));

        let absent = spec("tc").with_config_key("plugins", "tc").enabled_by_default(false);
        assert!(!resolve(&absent, &settings));

        let keyless = spec("web");
        assert!(resolve(&keyless, &settings));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = Registry::new(vec![spec("a"), spec("a")]).err().unwrap();
        assert_eq!(err.as_label(), "startup_duplicate_unit");
    }

    #[test]
    fn test_init_runs_only_for_enabled_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mk = |name: &'static str, on: bool| {
            let calls = Arc::clone(&calls);
            spec(name)
                .enabled_by_default(on)
                .with_init(move |_| {
                    calls.lock().unwrap().push(name);
                    Ok(())
                })
        };

        let mut reg = Registry::new(vec![mk("a", true), mk("b", false), mk("c", true)]).unwrap();
        let bus = Bus::new(16);
        reg.resolve_all(&Settings::new(), &bus);
        reg.initialize(&Settings::new(), &bus).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "c"]);
        assert_eq!(reg.enabled(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_init_error_is_fatal_and_stops_the_rest() {
        let ran = Arc::new(Mutex::new(false));
        let ran2 = Arc::clone(&ran);
        let mut reg = Registry::new(vec![
            spec("a").with_init(|_| Err(UnitError::fatal("no socket"))),
            spec("b").with_init(move |_| {
                *ran2.lock().unwrap() = true;
                Ok(())
            }),
        ])
        .unwrap();
        let bus = Bus::new(16);
        reg.resolve_all(&Settings::new(), &bus);

        let err = reg.initialize(&Settings::new(), &bus).unwrap_err();
        assert_eq!(err.as_label(), "startup_unit_init");
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_disable_is_idempotent() {
        let mut reg = Registry::new(vec![spec("a")]).unwrap();
        reg.resolve_all(&Settings::new(), &Bus::new(4));
        let entry = &mut reg.entries_mut()[0];
        assert!(entry.disable());
        assert!(!entry.disable());
        assert!(!entry.is_enabled());
    }
}
