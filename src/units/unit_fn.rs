//! # Function-backed unit (`UnitFn`)
//!
//! [`UnitFn`] wraps a closure `F: Fn(UnitContext) -> Fut`.
//!
//! ## Example
//! ```rust
//! use unitvisor::{UnitContext, UnitError, UnitFn, UnitRef};
//!
//! let u: UnitRef = UnitFn::arc("idle", |ctx: UnitContext| async move {
//!     ctx.cancelled().await;
//!     Ok::<_, UnitError>(())
//! });
//!
//! assert_eq!(u.name(), "idle");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::UnitError;
use crate::units::{Unit, UnitContext};

/// Function-backed unit implementation.
pub struct UnitFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> UnitFn<F> {
    /// Creates a new function-backed unit.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the unit and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Unit for UnitFn<F>
where
    F: Fn(UnitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), UnitError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: UnitContext) -> Result<(), UnitError> {
        (self.f)(ctx).await
    }
}
