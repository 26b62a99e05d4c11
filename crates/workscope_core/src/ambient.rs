//! Chain-scoped storage for the ambient scope.
//!
//! The engine makes the innermost live scope *ambient*: visible to the whole
//! logical call chain that created it, without being passed as a parameter.
//! Two pieces make that work:
//!
//! - a **chain-local cell** holding the identity token of the current
//!   ambient scope. For asynchronous flows this is a [`tokio::task_local!`]
//!   cell installed by [`bind`], which travels with the future across
//!   suspension points and cross-worker resumption. Flows that never call
//!   [`bind`] fall back to a plain `thread_local!` cell, which is correct
//!   for synchronous code but not across `.await` - truly ambient behavior
//!   in async code requires [`bind`].
//! - a process-wide **weak side-table** mapping each live token to its
//!   scope. The table holds [`Weak`] references only, so it is never the
//!   reason a scope stays alive: a scope leaked without disposal simply
//!   stops resolving and is reported as a diagnostic.
//!
//! Only tokens cross the cell boundary, never scope references - a token that
//! outlives its scope degrades to "no ambient scope" instead of dangling.
//!
//! Independently spawned tasks do not inherit the cell. Within one flow,
//! callers must still hide the ambient scope before handing work to parallel
//! tasks on the same chain (see
//! [`ScopeFactory::suppress_ambient`](crate::factory::ScopeFactory::suppress_ambient)).

use crate::scope::ScopeCore;
use core::cell::Cell;
use core::future::Future;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock, Weak};

// ─────────────────────────────────────────────────────────────────────────────
// ScopeToken
// ─────────────────────────────────────────────────────────────────────────────

/// Identity token of a scope, the only value stored in the chain-local cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl ScopeToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

tokio::task_local! {
    /// Chain-local cell for flows running under [`bind`].
    static FLOW_CELL: Cell<Option<ScopeToken>>;
}

thread_local! {
    /// Fallback cell for flows not running under [`bind`].
    static THREAD_CELL: Cell<Option<ScopeToken>> = const { Cell::new(None) };
}

/// Weak side-table of live scopes, keyed by token.
static SCOPES: LazyLock<Mutex<HashMap<ScopeToken, Weak<ScopeCore>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn read_cell() -> Option<ScopeToken> {
    FLOW_CELL
        .try_with(Cell::get)
        .unwrap_or_else(|_| THREAD_CELL.with(Cell::get))
}

fn write_cell(token: Option<ScopeToken>) {
    if FLOW_CELL.try_with(|cell| cell.set(token)).is_err() {
        THREAD_CELL.with(|cell| cell.set(token));
    }
}

/// Runs a future with its own ambient-scope chain.
///
/// Installs a fresh chain-local cell around `fut`, so scopes created inside
/// stay ambient across every `.await` of that future, even when it resumes
/// on a different worker thread. Nested `bind` calls shadow the outer chain,
/// which is also how independently spawned tasks should set up their own:
///
/// ```ignore
/// tokio::spawn(ambient::bind(async move {
///     let scope = factory.create(ScopeOption::ForceCreateNew)?;
///     // ...
/// }));
/// ```
pub async fn bind<F: Future>(fut: F) -> F::Output {
    FLOW_CELL.scope(Cell::new(None), fut).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Slot operations
// ─────────────────────────────────────────────────────────────────────────────

/// Makes `scope` the ambient one for the current chain.
///
/// Idempotent: a no-op when `scope` is already ambient. Registers the token
/// in the side-table either way it becomes ambient.
pub(crate) fn set(scope: &Arc<ScopeCore>) {
    let token = scope.token();
    if read_cell() == Some(token) {
        return;
    }
    SCOPES.lock().insert(token, Arc::downgrade(scope));
    write_cell(Some(token));
}

/// Returns the currently ambient scope for this chain, if any.
///
/// A token left in the cell without a live scope behind it means the scope
/// was abandoned without disposal; that is reported as a diagnostic and
/// degrades to `None` - never a panic, since this runs on lookup paths that
/// must not mask the caller's own work.
pub(crate) fn get() -> Option<Arc<ScopeCore>> {
    let token = read_cell()?;
    let mut scopes = SCOPES.lock();
    match scopes.get(&token).map(Weak::upgrade) {
        Some(Some(scope)) => Some(scope),
        Some(None) => {
            scopes.remove(&token);
            drop(scopes);
            tracing::warn!(
                ?token,
                "ambient scope was dropped without being disposed; treating as no ambient scope"
            );
            None
        }
        None => {
            drop(scopes);
            tracing::warn!(
                ?token,
                "ambient token has no registered scope; treating as no ambient scope"
            );
            None
        }
    }
}

/// Clears the chain-local cell and retires the ambient token.
///
/// Called on proper disposal of the ambient scope.
pub(crate) fn remove() {
    if let Some(token) = read_cell() {
        SCOPES.lock().remove(&token);
    }
    write_cell(None);
}

/// Clears the chain-local cell *without* retiring the token.
///
/// The scope stays registered and can be restored later via [`set`]; this is
/// what suppression uses so the original chain can get its scope back after
/// a parallel dispatch returns.
pub(crate) fn hide() {
    write_cell(None);
}

#[cfg(test)]
pub(crate) fn current_token() -> Option<ScopeToken> {
    read_cell()
}
