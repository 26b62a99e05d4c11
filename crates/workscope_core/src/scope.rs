//! Unit-of-work scopes.
//!
//! A [`WorkScope`] encapsulates one business transaction: create it at the
//! start of a service method, obtain contexts through it (or through
//! [`AmbientContexts`](crate::locator::AmbientContexts) further down the
//! stack), call [`save_changes`](WorkScope::save_changes) exactly once at the
//! end. Scopes nest transparently - an inner scope created with
//! [`ScopeOption::JoinExisting`] reuses the outer scope's context collection
//! and leaves commit/rollback to the outermost scope.
//!
//! Disposal is part of the contract: a scope disposed without having saved
//! rolls back (read/write) or auto-commits (read-only). Dropping a scope
//! disposes it, so the rollback guarantee holds even on early returns and
//! panics. Scopes must be disposed in exact reverse order of creation.

use crate::ambient::{self, ScopeToken};
use crate::collection::ContextCollection;
use crate::context::{EntityRef, IsolationLevel, PersistenceContext, RefreshStrategy};
use crate::error::ScopeError;
use crate::factory::ScopeOption;
use crate::registry::ContextRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// ScopeCore
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScopeState {
    completed: bool,
    disposed: bool,
}

/// Shared interior of a scope, referenced by the public handle, by child
/// scopes (as their captured parent) and weakly by the ambient side-table.
pub(crate) struct ScopeCore {
    token: ScopeToken,
    nested: bool,
    read_only: bool,
    contexts: Arc<ContextCollection>,
    /// The scope that was ambient when this one was created, if any.
    parent: Option<Arc<ScopeCore>>,
    refresh: Option<Arc<dyn RefreshStrategy>>,
    state: Mutex<ScopeState>,
}

impl ScopeCore {
    pub(crate) fn token(&self) -> ScopeToken {
        self.token
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub(crate) fn contexts(&self) -> &Arc<ContextCollection> {
        &self.contexts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkScope
// ─────────────────────────────────────────────────────────────────────────────

/// An ambient unit-of-work scope.
///
/// Created through a [`ScopeFactory`](crate::factory::ScopeFactory); becomes
/// ambient for the current logical flow immediately upon construction.
///
/// # Example
///
/// ```ignore
/// let mut scope = factory.create(ScopeOption::JoinExisting)?;
/// let orders = scope.context::<OrdersContext>()?;
/// orders.add(order)?;
/// scope.save_changes()?;
/// ```
pub struct WorkScope {
    core: Arc<ScopeCore>,
}

impl WorkScope {
    /// Resolves join-vs-create against the ambient chain and registers the
    /// new scope as ambient. Construction is the only place configuration
    /// errors are raised; nothing is mutated when one is.
    pub(crate) fn open(
        registry: Arc<ContextRegistry>,
        refresh: Option<Arc<dyn RefreshStrategy>>,
        option: ScopeOption,
        read_only: bool,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self, ScopeError> {
        if isolation.is_some() && option == ScopeOption::JoinExisting {
            return Err(ScopeError::IsolationRequiresOwnScope);
        }

        let parent = ambient::get();
        let (nested, contexts) = match (&parent, option) {
            (Some(parent), ScopeOption::JoinExisting) => {
                if parent.is_read_only() && !read_only {
                    return Err(ScopeError::ReadWriteWithinReadOnly);
                }
                (true, Arc::clone(parent.contexts()))
            }
            _ => (
                false,
                Arc::new(ContextCollection::new(registry, read_only, isolation)),
            ),
        };

        let core = Arc::new(ScopeCore {
            token: ScopeToken::next(),
            nested,
            read_only,
            contexts,
            parent,
            refresh,
            state: Mutex::new(ScopeState::default()),
        });
        ambient::set(&core);
        Ok(Self { core })
    }

    /// Whether this scope joined an existing ambient scope's collection.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.core.nested
    }

    /// Whether this scope's contexts are constructed read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.core.read_only
    }

    /// The context collection this scope manages.
    ///
    /// Don't save contexts individually - save the scope instead.
    #[must_use]
    pub fn contexts(&self) -> &ContextCollection {
        &self.core.contexts
    }

    /// Gets or creates the context of type `T` from this scope's collection.
    pub fn context<T: PersistenceContext>(&self) -> Result<Arc<T>, ScopeError> {
        self.core.contexts.get::<T>()
    }

    /// Saves the changes in all contexts this scope manages.
    ///
    /// May be called at most once per scope. A nested scope completes without
    /// committing anything - the outermost scope in the chain decides when
    /// changes are saved. Returns the aggregate change count (always 0 for a
    /// nested scope).
    ///
    /// # Errors
    ///
    /// [`ScopeError::AlreadyCompleted`] on a second call,
    /// [`ScopeError::ScopeDisposed`] after disposal; commit failures abort
    /// the group and propagate, leaving the scope not-completed so disposal
    /// rolls back.
    pub fn save_changes(&mut self) -> Result<usize, ScopeError> {
        self.check_can_save()?;
        let written = if self.core.nested {
            0
        } else {
            self.core.contexts.commit()?
        };
        self.core.state.lock().completed = true;
        Ok(written)
    }

    /// Cancellation-aware form of [`save_changes`](Self::save_changes).
    ///
    /// Suspends only while contexts commit; the ambient slot still refers to
    /// this scope when the caller's chain resumes. A fired token aborts with
    /// [`ScopeError::Cancelled`] and leaves the scope eligible for
    /// disposal-triggered rollback.
    pub async fn save_changes_async(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<usize, ScopeError> {
        self.check_can_save()?;
        let written = if self.core.nested {
            0
        } else {
            self.core.contexts.commit_async(cancel).await?
        };
        self.core.state.lock().completed = true;
        Ok(written)
    }

    fn check_can_save(&self) -> Result<(), ScopeError> {
        let state = self.core.state.lock();
        if state.disposed {
            return Err(ScopeError::ScopeDisposed);
        }
        if state.completed {
            return Err(ScopeError::AlreadyCompleted);
        }
        Ok(())
    }

    /// Reloads the given entities in the parent scope's contexts.
    ///
    /// Useful after a forced-new scope committed changes the parent's
    /// contexts may hold stale copies of. No-op when there is no parent, when
    /// this scope is nested (parent shares the same context instances), or
    /// when `entities` is empty. Entities the parent has modified are left
    /// untouched.
    pub fn refresh_entities_in_parent(&self, entities: &[EntityRef]) -> Result<(), ScopeError> {
        let Some((strategy, parent)) = self.refresh_target(entities) else {
            return Ok(());
        };
        strategy
            .refresh_in_parent(
                entities,
                &self.core.contexts.initialized_contexts(),
                &parent.contexts().initialized_contexts(),
            )
            .map_err(ScopeError::Context)
    }

    /// Suspension-capable form of
    /// [`refresh_entities_in_parent`](Self::refresh_entities_in_parent), with
    /// identical semantics.
    pub async fn refresh_entities_in_parent_async(
        &self,
        entities: &[EntityRef],
    ) -> Result<(), ScopeError> {
        let Some((strategy, parent)) = self.refresh_target(entities) else {
            return Ok(());
        };
        strategy
            .refresh_in_parent_async(
                entities,
                self.core.contexts.initialized_contexts(),
                parent.contexts().initialized_contexts(),
            )
            .await
            .map_err(ScopeError::Context)
    }

    fn refresh_target(
        &self,
        entities: &[EntityRef],
    ) -> Option<(Arc<dyn RefreshStrategy>, Arc<ScopeCore>)> {
        if entities.is_empty() || self.core.nested {
            return None;
        }
        let parent = self.core.parent.clone()?;
        match &self.core.refresh {
            Some(strategy) => Some((Arc::clone(strategy), parent)),
            None => {
                tracing::debug!("no refresh strategy configured; skipping parent refresh");
                None
            }
        }
    }

    /// Finalizes the scope.
    ///
    /// Idempotent. For the outermost scope in a chain this commits (read-only,
    /// unsaved) or rolls back (read/write, unsaved) and then disposes the
    /// context collection; cleanup failures are logged, not raised. The scope
    /// is popped from the ambient chain and its captured parent restored.
    ///
    /// Dropping the scope runs the same routine, but a LIFO violation then
    /// panics instead of returning
    /// [`ScopeError::OutOfOrderDisposal`].
    pub fn dispose(&mut self) -> Result<(), ScopeError> {
        Self::dispose_core(&self.core)
    }

    fn dispose_core(core: &Arc<ScopeCore>) -> Result<(), ScopeError> {
        if core.is_disposed() {
            return Ok(());
        }

        if !core.nested {
            let completed = core.state.lock().completed;
            if !completed {
                // Too late to surface failures here; the original error (if
                // any) is already unwinding through the caller.
                let outcome = if core.read_only {
                    // Disposing a read-only scope without saving is the
                    // normal fire-and-forget read path: commit automatically.
                    core.contexts.commit().map(drop)
                } else {
                    core.contexts.rollback()
                };
                if let Err(err) = outcome {
                    tracing::warn!(error = %err, "cleanup failed while disposing an unsaved scope");
                }
                core.state.lock().completed = true;
            }
            core.contexts.dispose();
        }

        let ours = ambient::get().is_some_and(|current| Arc::ptr_eq(&current, core));
        if !ours {
            // The cell refers to a younger scope (or none). The cleanup above
            // already ran, so mark disposed rather than leaving the scope
            // half-finalized; the ambient cell is left for its rightful owner.
            core.state.lock().disposed = true;
            tracing::error!(
                "scope disposed while it was not the ambient one; scopes must be disposed in \
                 the reverse order in which they were created"
            );
            return Err(ScopeError::OutOfOrderDisposal);
        }
        ambient::remove();

        if let Some(parent) = &core.parent {
            if parent.is_disposed() {
                // Our captured parent belonged to a flow that already ended:
                // this scope was created in a parallel flow that captured the
                // ambient scope of its spawner. Suppress the ambient scope
                // before spawning parallel work to avoid this. Not restoring.
                tracing::error!(
                    "captured parent scope was already disposed - the ambient scope leaked into \
                     a parallel flow; wrap the spawn in ScopeFactory::suppress_ambient"
                );
            } else {
                ambient::set(parent);
            }
        }

        core.state.lock().disposed = true;
        Ok(())
    }
}

impl Drop for WorkScope {
    fn drop(&mut self) {
        if self.core.is_disposed() {
            return;
        }
        if let Err(err) = Self::dispose_core(&self.core) {
            if std::thread::panicking() {
                tracing::error!(error = %err, "scope disposal failed during unwind");
            } else {
                panic!("{err}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReadOnlyScope
// ─────────────────────────────────────────────────────────────────────────────

/// A read-only unit-of-work scope.
///
/// Contexts are constructed with change tracking disabled and there is no
/// save operation: disposal commits automatically, which for a read path is
/// a no-op with clean transaction shutdown. Read/write scopes cannot be
/// nested inside a read-only one.
pub struct ReadOnlyScope {
    inner: WorkScope,
}

impl ReadOnlyScope {
    pub(crate) fn new(inner: WorkScope) -> Self {
        Self { inner }
    }

    /// Whether this scope joined an existing ambient scope's collection.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.inner.is_nested()
    }

    /// The context collection this scope manages.
    #[must_use]
    pub fn contexts(&self) -> &ContextCollection {
        self.inner.contexts()
    }

    /// Gets or creates the context of type `T` from this scope's collection.
    pub fn context<T: PersistenceContext>(&self) -> Result<Arc<T>, ScopeError> {
        self.inner.context::<T>()
    }

    /// Finalizes the scope, committing automatically. Idempotent.
    pub fn dispose(&mut self) -> Result<(), ScopeError> {
        self.inner.dispose()
    }
}
