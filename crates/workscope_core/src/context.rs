//! Collaborator contracts the scope engine depends on.
//!
//! The engine never talks to a store directly. Everything it needs from a
//! persistence layer is expressed through three narrow contracts:
//!
//! - [`PersistenceContext`] - a unit of change tracking that can open a
//!   transaction, save its pending changes, and be disposed
//! - [`ContextTransaction`] - a transaction handle opened at an explicit
//!   [`IsolationLevel`]
//! - [`RefreshStrategy`] - reconciles entities between an inner scope and
//!   its parent after a forced-new scope committed independently
//!
//! Implementations live outside this crate (see `workscope_memory` for a
//! reference adapter). The engine invokes them and propagates their
//! [`ContextError`]s unchanged.

use crate::error::ContextError;
use core::any::{Any, TypeId};
use core::future::Future;
use core::pin::Pin;
use downcast_rs::{DowncastSync, impl_downcast};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Boxed future type used for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased reference to an entity, as handed to a [`RefreshStrategy`].
pub type EntityRef = Arc<dyn Any + Send + Sync>;

/// Snapshot of the contexts a collection has instantiated so far.
pub type InitializedContexts = Vec<(TypeId, Arc<dyn PersistenceContext>)>;

// ─────────────────────────────────────────────────────────────────────────────
// IsolationLevel
// ─────────────────────────────────────────────────────────────────────────────

/// Transaction isolation level requested for a standalone scope.
///
/// Passing a level to [`ScopeFactory::create_with_isolation`] makes the scope
/// open an explicit transaction at that level on each context the first time
/// the context is requested.
///
/// [`ScopeFactory::create_with_isolation`]: crate::factory::ScopeFactory::create_with_isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Rows read within the transaction do not change underneath it.
    RepeatableRead,
    /// Statement-consistent snapshot of the store.
    Snapshot,
    /// Full serializability.
    Serializable,
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistenceContext
// ─────────────────────────────────────────────────────────────────────────────

/// A persistence context: one lazily-created, change-tracking unit of work
/// over some backing store.
///
/// Contexts are created at most once per type per [`ContextCollection`] and
/// are shared by every scope in a nesting chain. They are not thread-safe by
/// contract - the engine guarantees a single active logical flow per chain,
/// and callers must suppress the ambient scope before fanning out parallel
/// work (see [`ScopeFactory::suppress_ambient`]).
///
/// [`ContextCollection`]: crate::collection::ContextCollection
/// [`ScopeFactory::suppress_ambient`]: crate::factory::ScopeFactory::suppress_ambient
pub trait PersistenceContext: DowncastSync {
    /// Returns the context's type name for diagnostics.
    fn type_name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    /// Opens an explicit transaction at the given isolation level.
    ///
    /// Called by the collection immediately after constructing the context
    /// when the owning scope was created with an explicit isolation level.
    fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> Result<Box<dyn ContextTransaction>, ContextError>;

    /// Commits all pending changes, returning the number of entities written.
    fn save_changes(&self) -> Result<usize, ContextError>;

    /// Cancellation-aware form of [`save_changes`](Self::save_changes).
    ///
    /// The default implementation performs the save synchronously and ignores
    /// the token; the collection checks the token between contexts either
    /// way. Override for stores with genuinely asynchronous commits.
    fn save_changes_async<'a>(
        &'a self,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<usize, ContextError>> {
        let _ = cancel;
        let result = self.save_changes();
        Box::pin(async move { result })
    }

    /// Discards pending tracked changes without touching the store.
    ///
    /// Invoked on every instantiated context when a read/write scope is
    /// disposed without having saved.
    fn rollback_pending(&self) -> Result<(), ContextError>;

    /// Releases the context. Called exactly once, by the outermost scope.
    fn dispose(&self) -> Result<(), ContextError>;
}

impl_downcast!(sync PersistenceContext);

// ─────────────────────────────────────────────────────────────────────────────
// ContextTransaction
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to an explicit transaction opened by a [`PersistenceContext`].
///
/// Dropping a handle that was neither committed nor rolled back must abort
/// the transaction.
pub trait ContextTransaction: Send {
    /// The isolation level the transaction was opened at.
    fn isolation_level(&self) -> IsolationLevel;

    /// Makes the transaction's effects permanent.
    fn commit(self: Box<Self>) -> Result<(), ContextError>;

    /// Discards the transaction's effects.
    fn rollback(self: Box<Self>) -> Result<(), ContextError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// RefreshStrategy
// ─────────────────────────────────────────────────────────────────────────────

/// Reconciles entities between a scope and its parent.
///
/// When an inner scope was forced to create its own context collection
/// ([`ScopeOption::ForceCreateNew`]) and committed, the parent's contexts may
/// still hold stale copies of the entities the inner scope wrote. A strategy
/// receives the entities in question together with the initialized contexts
/// of both scopes and reloads, from the backing store, every entity that a
/// same-typed parent context tracks *unchanged*. Entities already modified in
/// the parent are left untouched so pending edits are never clobbered.
///
/// [`ScopeOption::ForceCreateNew`]: crate::factory::ScopeOption::ForceCreateNew
pub trait RefreshStrategy: Send + Sync {
    /// Refreshes `entities` in the parent's contexts.
    fn refresh_in_parent(
        &self,
        entities: &[EntityRef],
        current: &InitializedContexts,
        parent: &InitializedContexts,
    ) -> Result<(), ContextError>;

    /// Suspension-capable form of [`refresh_in_parent`](Self::refresh_in_parent),
    /// with identical semantics.
    fn refresh_in_parent_async<'a>(
        &'a self,
        entities: &'a [EntityRef],
        current: InitializedContexts,
        parent: InitializedContexts,
    ) -> BoxFuture<'a, Result<(), ContextError>>;
}
