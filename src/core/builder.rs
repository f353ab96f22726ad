use std::sync::Arc;

use crate::{
    config::Config,
    context::ShutdownContext,
    events::Bus,
    storage::{NoStorage, Storage},
    subscribers::Subscribe,
    units::UnitSpec,
};

use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    units: Vec<UnitSpec>,
    storage: Arc<dyn Storage>,
    ctx: Option<Arc<ShutdownContext>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            units: Vec::new(),
            storage: Arc::new(NoStorage),
            ctx: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (unit lifecycle, shutdown steps, etc.)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Appends units in registration order.
    pub fn with_units(mut self, units: Vec<UnitSpec>) -> Self {
        self.units.extend(units);
        self
    }

    /// Appends one unit.
    pub fn with_unit(mut self, unit: UnitSpec) -> Self {
        self.units.push(unit);
        self
    }

    /// Sets the storage collaborator persisted at TERMINATED.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Shares an existing shutdown context (e.g. one a storage collaborator already reads).
    pub fn with_context(mut self, ctx: Arc<ShutdownContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Builds the supervisor. Nothing is started until [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        Supervisor {
            bus: Bus::new(self.cfg.bus_capacity_clamped()),
            cfg: self.cfg,
            subscribers: self.subscribers,
            units: self.units,
            storage: self.storage,
            ctx: self.ctx.unwrap_or_else(ShutdownContext::new),
        }
    }
}
