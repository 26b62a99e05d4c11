//! The ambient unit-of-work scope engine.
//!
//! `workscope_core` lets deeply nested call stacks share a single set of
//! lazily-created, per-type persistence contexts for the duration of one
//! business transaction, without passing them as parameters:
//!
//! - [`scope`] - scope lifecycle: join/create, save, rollback-on-dispose
//! - [`ambient`] - chain-scoped storage that makes a scope ambient, across
//!   `.await` points and cross-worker resumption
//! - [`collection`] - the per-type context collection a scope chain shares
//! - [`factory`] - scope creation API and ambient suppression
//! - [`locator`] - context lookup for repository/query layers
//! - [`context`] - the contracts persistence adapters implement
//! - [`registry`] - per-type context constructor registration
//!
//! # Example
//!
//! ```ignore
//! use workscope_core::prelude::*;
//!
//! let factory = ScopeFactory::new(
//!     ContextRegistry::new().register::<OrdersContext, _>(OrdersContext::open),
//! );
//!
//! ambient::bind(async {
//!     let mut scope = factory.create(ScopeOption::JoinExisting)?;
//!     scope.context::<OrdersContext>()?.add(order)?;
//!     scope.save_changes()
//! })
//! .await?;
//! ```
//!
//! # Concurrency
//!
//! Contexts are not thread-safe; the engine assumes one active logical flow
//! per scope chain. A flow may suspend and resume on another worker - run it
//! under [`ambient::bind`] and the ambient scope follows. Parallel fan-out
//! must not share a scope: hide it first with
//! [`ScopeFactory::suppress_ambient`](factory::ScopeFactory::suppress_ambient).

/// Chain-scoped ambient storage.
pub mod ambient;

/// Per-type context collections.
pub mod collection;

/// Collaborator contracts (contexts, transactions, refresh).
pub mod context;

/// Error types.
pub mod error;

/// Scope creation API and ambient suppression.
pub mod factory;

/// Ambient context lookup.
pub mod locator;

/// Context constructor registry.
pub mod registry;

/// Unit-of-work scopes.
pub mod scope;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::ambient::bind;
    pub use crate::collection::ContextCollection;
    pub use crate::context::{
        BoxFuture, ContextTransaction, EntityRef, InitializedContexts, IsolationLevel,
        PersistenceContext, RefreshStrategy,
    };
    pub use crate::error::{ContextError, ScopeError};
    pub use crate::factory::{ScopeFactory, ScopeOption, SuppressionGuard};
    pub use crate::locator::AmbientContexts;
    pub use crate::registry::ContextRegistry;
    pub use crate::scope::{ReadOnlyScope, WorkScope};
}
