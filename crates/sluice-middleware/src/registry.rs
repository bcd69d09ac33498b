//! Strategy registration.
//!
//! Two ordered lists feed the executor:
//!
//! - the global list held by [`StrategyRegistry`], applied to every route
//!   that does not opt out, in registration order
//! - each route's own list held by its
//!   [`ApiDescriptor`](crate::ApiDescriptor), in declaration order
//!
//! Both are written at startup and read-only afterwards.

use crate::strategy::{Param, Strategy};
use std::fmt;
use std::sync::Arc;

/// A strategy paired with its parameter and disable flag.
///
/// The disable flag is fixed when the invocation is registered; a disabled
/// invocation never runs.
#[derive(Clone)]
pub struct StrategyInvocation {
    strategy: Arc<dyn Strategy>,
    param: Param,
    disabled: bool,
}

impl StrategyInvocation {
    /// Creates an enabled invocation.
    #[must_use]
    pub fn new(strategy: Arc<dyn Strategy>, param: Param) -> Self {
        Self {
            strategy,
            param,
            disabled: false,
        }
    }

    /// Sets the disable flag.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Returns the strategy.
    #[must_use]
    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    /// Returns the parameter handed to the strategy.
    #[must_use]
    pub fn param(&self) -> &Param {
        &self.param
    }

    /// Returns `true` if this invocation never runs.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

impl fmt::Debug for StrategyInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyInvocation")
            .field("strategy", &self.strategy.name())
            .field("param", &self.param)
            .field("disabled", &self.disabled)
            .finish()
    }
}

/// Registry of global strategies.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sluice_middleware::{Param, StrategyRegistry};
/// use sluice_middleware::stages::StatsStrategy;
///
/// let mut registry = StrategyRegistry::new();
/// registry.register_global(Arc::new(StatsStrategy::new()), Param::none(), false);
/// assert_eq!(registry.names(), vec!["stats"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    global: Vec<StrategyInvocation>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a global strategy.
    pub fn register_global(
        &mut self,
        strategy: Arc<dyn Strategy>,
        param: Param,
        disabled: bool,
    ) -> &mut Self {
        tracing::debug!(
            strategy = strategy.name(),
            disabled,
            position = self.global.len(),
            "global strategy registered"
        );
        self.global
            .push(StrategyInvocation::new(strategy, param).disabled(disabled));
        self
    }

    /// Appends a prepared invocation.
    pub fn push(&mut self, invocation: StrategyInvocation) -> &mut Self {
        self.global.push(invocation);
        self
    }

    /// Returns all registered invocations in registration order.
    #[must_use]
    pub fn invocations(&self) -> &[StrategyInvocation] {
        &self.global
    }

    /// Returns the enabled invocations in registration order.
    pub fn active(&self) -> impl Iterator<Item = &StrategyInvocation> {
        self.global.iter().filter(|i| !i.is_disabled())
    }

    /// Returns the names of all registered strategies.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.global.iter().map(|i| i.strategy().name()).collect()
    }

    /// Returns the number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.global.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }
}
