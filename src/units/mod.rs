//! # Unit abstractions and specifications.
//!
//! This module provides the unit-related types:
//! - [`Unit`] - trait for implementing a cancelable worker run on its own thread
//! - [`UnitFn`] - function-based unit implementation
//! - [`UnitRef`] - shared reference to a unit (`Arc<dyn Unit>`)
//! - [`UnitSpec`] - registry entry: unit plus category, enablement key and init routine
//! - [`UnitContext`] - what a running unit receives from the supervisor

mod context;
mod spec;
mod unit;
mod unit_fn;

pub use context::UnitContext;
pub use spec::{ConfigKey, InitFn, UnitSpec};
pub use unit::{Unit, UnitRef};
pub use unit_fn::UnitFn;
