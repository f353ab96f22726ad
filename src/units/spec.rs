//! # Unit specification (registry entry).
//!
//! [`UnitSpec`] bundles a unit with the static data the registry needs:
//! category, the (section, option) key that enables or disables it, the
//! default used when that key is absent, and an optional init routine.
//!
//! ## Example
//! ```rust
//! use unitvisor::{UnitContext, UnitError, UnitFn, UnitSpec};
//!
//! let spec = UnitSpec::new(UnitFn::arc("proc", |ctx: UnitContext| async move {
//!     ctx.cancelled().await;
//!     Ok::<_, UnitError>(())
//! }))
//! .with_category("plugins")
//! .with_config_key("plugins", "proc")
//! .enabled_by_default(true);
//!
//! assert_eq!(spec.name(), "proc");
//! assert_eq!(spec.config_key().map(|k| k.option.as_str()), Some("proc"));
//! ```

use std::sync::Arc;

use crate::config::Settings;
use crate::error::UnitError;
use crate::units::UnitRef;

/// One-time setup run for enabled units before launch.
///
/// Returning an error aborts startup.
pub type InitFn = Arc<dyn Fn(&Settings) -> Result<(), UnitError> + Send + Sync>;

/// Configuration key resolving a unit's enablement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigKey {
    pub section: String,
    pub option: String,
}

/// Static description of a unit in the registry.
#[derive(Clone)]
pub struct UnitSpec {
    unit: UnitRef,
    category: Option<String>,
    config_key: Option<ConfigKey>,
    default_enabled: bool,
    init: Option<InitFn>,
}

impl UnitSpec {
    /// Creates a spec enabled by default, with no config key and no init routine.
    pub fn new(unit: UnitRef) -> Self {
        Self {
            unit,
            category: None,
            config_key: None,
            default_enabled: true,
            init: None,
        }
    }

    /// Sets the category (e.g. `plugins`).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the (section, option) key read by the enablement resolver.
    pub fn with_config_key(mut self, section: impl Into<String>, option: impl Into<String>) -> Self {
        self.config_key = Some(ConfigKey {
            section: section.into(),
            option: option.into(),
        });
        self
    }

    /// Sets the static default used when the config key is absent.
    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.default_enabled = enabled;
        self
    }

    /// Sets the init routine.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&Settings) -> Result<(), UnitError> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    pub fn unit(&self) -> &UnitRef {
        &self.unit
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn config_key(&self) -> Option<&ConfigKey> {
        self.config_key.as_ref()
    }

    pub fn default_enabled(&self) -> bool {
        self.default_enabled
    }

    pub fn init(&self) -> Option<&InitFn> {
        self.init.as_ref()
    }
}
