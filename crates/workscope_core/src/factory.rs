//! Public construction surface for scopes.
//!
//! A [`ScopeFactory`] carries the context constructor registry (and the
//! optional refresh strategy) and produces every flavor of scope: plain
//! read/write, read-only, and isolation-bound variants of both, plus the
//! [`SuppressionGuard`] used to hide the ambient scope around parallel
//! dispatch.

use crate::ambient;
use crate::context::{IsolationLevel, RefreshStrategy};
use crate::error::ScopeError;
use crate::registry::ContextRegistry;
use crate::scope::{ReadOnlyScope, ScopeCore, WorkScope};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// ScopeOption
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a new scope joins the ambient scope's context collection or
/// creates its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeOption {
    /// Reuse the ambient scope's collection when one exists (the default).
    #[default]
    JoinExisting,
    /// Always create a fresh collection, even inside an ambient scope.
    ForceCreateNew,
}

// ─────────────────────────────────────────────────────────────────────────────
// ScopeFactory
// ─────────────────────────────────────────────────────────────────────────────

/// Creates unit-of-work scopes.
///
/// Cheap to clone; typically constructed once at application startup with
/// the full context registry and handed to every service.
///
/// # Example
///
/// ```ignore
/// let factory = ScopeFactory::new(
///     ContextRegistry::new().register::<OrdersContext, _>(OrdersContext::open),
/// );
///
/// let mut scope = factory.create(ScopeOption::JoinExisting)?;
/// scope.context::<OrdersContext>()?.add(order)?;
/// scope.save_changes()?;
/// ```
#[derive(Clone)]
pub struct ScopeFactory {
    registry: Arc<ContextRegistry>,
    refresh: Option<Arc<dyn RefreshStrategy>>,
}

impl ScopeFactory {
    /// Creates a factory over the given context registry.
    #[must_use]
    pub fn new(registry: ContextRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            refresh: None,
        }
    }

    /// Installs the strategy scopes use to refresh entities in their parent.
    #[must_use]
    pub fn with_refresh_strategy(mut self, strategy: impl RefreshStrategy + 'static) -> Self {
        self.refresh = Some(Arc::new(strategy));
        self
    }

    /// Creates a read/write scope.
    pub fn create(&self, option: ScopeOption) -> Result<WorkScope, ScopeError> {
        WorkScope::open(
            Arc::clone(&self.registry),
            self.refresh.clone(),
            option,
            false,
            None,
        )
    }

    /// Creates a read-only scope.
    pub fn create_read_only(&self, option: ScopeOption) -> Result<ReadOnlyScope, ScopeError> {
        WorkScope::open(
            Arc::clone(&self.registry),
            self.refresh.clone(),
            option,
            true,
            None,
        )
        .map(ReadOnlyScope::new)
    }

    /// Creates a read/write scope bound to an explicit transaction isolation
    /// level.
    ///
    /// Such a scope never joins the ambient chain: an explicit level implies
    /// a standalone transaction.
    pub fn create_with_isolation(&self, level: IsolationLevel) -> Result<WorkScope, ScopeError> {
        WorkScope::open(
            Arc::clone(&self.registry),
            self.refresh.clone(),
            ScopeOption::ForceCreateNew,
            false,
            Some(level),
        )
    }

    /// Read-only variant of
    /// [`create_with_isolation`](Self::create_with_isolation).
    pub fn create_read_only_with_isolation(
        &self,
        level: IsolationLevel,
    ) -> Result<ReadOnlyScope, ScopeError> {
        WorkScope::open(
            Arc::clone(&self.registry),
            self.refresh.clone(),
            ScopeOption::ForceCreateNew,
            true,
            Some(level),
        )
        .map(ReadOnlyScope::new)
    }

    /// Hides the ambient scope until the returned guard is dropped.
    ///
    /// Call this before spawning parallel work from within a scope, so the
    /// spawned tasks cannot capture the current scope (and with it, contexts
    /// that are not safe for concurrent use). The pre-suppression scope is
    /// restored when the guard drops - including on unwind.
    ///
    /// # Example
    ///
    /// ```ignore
    /// {
    ///     let _suppressed = factory.suppress_ambient();
    ///     for chunk in chunks {
    ///         handles.push(tokio::spawn(ambient::bind(process(chunk))));
    ///     }
    /// }
    /// // the original scope is ambient again here
    /// ```
    #[must_use]
    pub fn suppress_ambient(&self) -> SuppressionGuard {
        SuppressionGuard::engage()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SuppressionGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Guard that keeps the ambient scope hidden for the current chain.
///
/// Created by [`ScopeFactory::suppress_ambient`]. On drop, the scope that
/// was ambient at acquisition is made ambient again.
pub struct SuppressionGuard {
    saved: Option<Arc<ScopeCore>>,
}

impl SuppressionGuard {
    fn engage() -> Self {
        let saved = ambient::get();
        ambient::hide();
        Self { saved }
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            ambient::set(&saved);
        }
    }
}
