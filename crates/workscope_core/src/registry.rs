//! Per-type constructor registry for persistence contexts.
//!
//! Context types do not implement a "construct yourself" trait; instead the
//! application registers one constructor per concrete type up front and hands
//! the registry to the [`ScopeFactory`]. Requesting a type that was never
//! registered is a configuration error.
//!
//! The constructor receives the scope's read-only flag so adapters can
//! disable change tracking on read paths.
//!
//! [`ScopeFactory`]: crate::factory::ScopeFactory

use crate::context::PersistenceContext;
use crate::error::{ContextError, ScopeError};
use core::any::TypeId;
use hashbrown::HashMap;
use std::sync::Arc;

/// Type-erased constructor producing a context for a given read-only flag.
type ContextConstructor =
    Box<dyn Fn(bool) -> Result<Arc<dyn PersistenceContext>, ContextError> + Send + Sync>;

/// Registry of per-type persistence context constructors.
///
/// # Example
///
/// ```ignore
/// let registry = ContextRegistry::new()
///     .register::<OrdersContext, _>(|read_only| OrdersContext::open(read_only))
///     .register_default::<AuditContext>();
///
/// let factory = ScopeFactory::new(registry);
/// ```
#[derive(Default)]
pub struct ContextRegistry {
    constructors: HashMap<TypeId, ContextConstructor>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor for context type `T`.
    ///
    /// The closure is invoked at most once per context collection, on the
    /// first `get::<T>()`. A second registration for the same type replaces
    /// the earlier one.
    #[must_use]
    pub fn register<T, F>(mut self, construct: F) -> Self
    where
        T: PersistenceContext,
        F: Fn(bool) -> Result<T, ContextError> + Send + Sync + 'static,
    {
        self.constructors.insert(
            TypeId::of::<T>(),
            Box::new(move |read_only| {
                construct(read_only).map(|ctx| Arc::new(ctx) as Arc<dyn PersistenceContext>)
            }),
        );
        self
    }

    /// Registers `T::default()` as the constructor for `T`.
    ///
    /// The read-only flag is not forwarded; use [`register`](Self::register)
    /// for types that adapt to it.
    #[must_use]
    pub fn register_default<T>(self) -> Self
    where
        T: PersistenceContext + Default,
    {
        self.register::<T, _>(|_| Ok(T::default()))
    }

    /// Returns `true` if a constructor is registered for `T`.
    #[must_use]
    pub fn contains<T: PersistenceContext>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<T>())
    }

    /// Constructs a context of the given type, or reports the missing
    /// registration.
    pub(crate) fn construct(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        read_only: bool,
    ) -> Result<Arc<dyn PersistenceContext>, ScopeError> {
        match self.constructors.get(&type_id) {
            Some(construct) => construct(read_only).map_err(ScopeError::Context),
            None => Err(ScopeError::UnregisteredContext(type_name)),
        }
    }
}
