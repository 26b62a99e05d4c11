//! Parent-scope entity refresh over in-memory contexts.
//!
//! After a forced-new scope commits, contexts in the parent scope may still
//! track stale copies of the entities it wrote. [`MemoryRefreshStrategy`]
//! walks the contexts both scopes have initialized, pairs them by concrete
//! type, and reloads from the store every entity the parent tracks
//! *unchanged* - pending edits in the parent always win over a refresh.
//!
//! The strategy only understands entity types it was told about: register
//! each one with [`register`](MemoryRefreshStrategy::register), the same way
//! context constructors are registered with the scope engine.

use crate::context::{Entity, EntityContext};
use core::any::TypeId;
use hashbrown::HashMap;
use workscope_core::context::{
    BoxFuture, EntityRef, InitializedContexts, PersistenceContext, RefreshStrategy,
};
use workscope_core::error::ContextError;

/// Per-entity-type refresh handler: given the same-typed contexts of the
/// inner and parent scope and one entity, refresh it in the parent if
/// applicable.
type RefreshFn = Box<
    dyn Fn(
            &dyn PersistenceContext,
            &dyn PersistenceContext,
            &EntityRef,
        ) -> Result<bool, ContextError>
        + Send
        + Sync,
>;

/// [`RefreshStrategy`] implementation for [`EntityContext`]-based scopes.
///
/// # Example
///
/// ```ignore
/// let factory = ScopeFactory::new(registry)
///     .with_refresh_strategy(MemoryRefreshStrategy::new().register::<User>());
/// ```
#[derive(Default)]
pub struct MemoryRefreshStrategy {
    handlers: HashMap<TypeId, RefreshFn>,
}

impl MemoryRefreshStrategy {
    /// Creates a strategy with no registered entity types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Teaches the strategy to refresh entities of type `E`.
    #[must_use]
    pub fn register<E: Entity>(mut self) -> Self {
        self.handlers.insert(
            TypeId::of::<EntityContext<E>>(),
            Box::new(|current, parent, entity| {
                let (Some(current), Some(parent)) = (
                    current.downcast_ref::<EntityContext<E>>(),
                    parent.downcast_ref::<EntityContext<E>>(),
                ) else {
                    return Ok(false);
                };
                let Some(entity) = entity.downcast_ref::<E>() else {
                    return Ok(false);
                };
                // Only entities the inner scope actually touched are
                // candidates; everything else is none of our business.
                if current.state_of(entity.key()).is_none() {
                    return Ok(false);
                }
                parent.refresh_unchanged(entity.key())
            }),
        );
        self
    }
}

impl RefreshStrategy for MemoryRefreshStrategy {
    fn refresh_in_parent(
        &self,
        entities: &[EntityRef],
        current: &InitializedContexts,
        parent: &InitializedContexts,
    ) -> Result<(), ContextError> {
        for (type_id, current_ctx) in current {
            let Some(handler) = self.handlers.get(type_id) else {
                continue;
            };
            // No context of this type in the parent scope means nothing can
            // be stale there.
            let Some((_, parent_ctx)) = parent.iter().find(|(parent_type, _)| parent_type == type_id)
            else {
                continue;
            };
            for entity in entities {
                handler(current_ctx.as_ref(), parent_ctx.as_ref(), entity)?;
            }
        }
        Ok(())
    }

    fn refresh_in_parent_async<'a>(
        &'a self,
        entities: &'a [EntityRef],
        current: InitializedContexts,
        parent: InitializedContexts,
    ) -> BoxFuture<'a, Result<(), ContextError>> {
        Box::pin(async move { self.refresh_in_parent(entities, &current, &parent) })
    }
}
