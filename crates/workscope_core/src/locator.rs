//! Convenience lookup of contexts from the ambient scope.
//!
//! Repositories and query classes typically should not see the scope that
//! manages their contexts - creating, saving and disposing scopes is the
//! service layer's job. [`AmbientContexts`] gives the lower layers exactly
//! the access they need: the context instances of whatever scope is
//! currently ambient, and nothing else.

use crate::ambient;
use crate::context::PersistenceContext;
use crate::error::ScopeError;
use std::sync::Arc;

/// Retrieves persistence contexts from the ambient scope.
///
/// Never creates a scope itself.
///
/// # Example
///
/// ```ignore
/// struct OrderRepository {
///     contexts: AmbientContexts,
/// }
///
/// impl OrderRepository {
///     fn find(&self, id: u64) -> Result<Option<Order>, ScopeError> {
///         let Some(orders) = self.contexts.get::<OrdersContext>()? else {
///             return Ok(None); // no ambient scope
///         };
///         orders.find(id).map_err(Into::into)
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientContexts;

impl AmbientContexts {
    /// Creates a locator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Gets or creates the ambient scope's context of type `T`.
    ///
    /// Returns `Ok(None)` when no scope is ambient for the current chain.
    pub fn get<T: PersistenceContext>(&self) -> Result<Option<Arc<T>>, ScopeError> {
        match ambient::get() {
            None => Ok(None),
            Some(scope) => scope.contexts().get::<T>().map(Some),
        }
    }

    /// Returns `true` if a scope is ambient for the current chain.
    #[must_use]
    pub fn has_ambient_scope(&self) -> bool {
        ambient::get().is_some()
    }
}
