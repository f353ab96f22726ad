//! # Unit abstraction.
//!
//! A unit is a named internal worker. The launcher gives each enabled unit a
//! dedicated OS thread driving a single-threaded runtime, and hands it a
//! [`UnitContext`] whose cancellation token is the only stop request it will
//! ever receive.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::UnitError;
use crate::units::UnitContext;

/// # Asynchronous, cancelable worker.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use unitvisor::{Unit, UnitContext, UnitError};
///
/// struct Collector;
///
/// #[async_trait]
/// impl Unit for Collector {
///     fn name(&self) -> &str { "collector" }
///
///     async fn run(&self, ctx: UnitContext) -> Result<(), UnitError> {
///         ctx.cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Unit: Send + Sync + 'static {
    /// Returns a stable, unique unit name.
    fn name(&self) -> &str;

    /// Runs the unit until it finishes or observes cancellation.
    ///
    /// Cancellation is cooperative: nobody waits for this to return.
    async fn run(&self, ctx: UnitContext) -> Result<(), UnitError>;
}

/// Shared handle to a unit.
pub type UnitRef = Arc<dyn Unit>;
