//! The per-type context collection a scope chain shares.
//!
//! A [`ContextCollection`] owns the mapping from context type to lazily
//! instantiated context instance. Exactly one collection is shared by an
//! entire chain of nested scopes; only the outermost scope commits, rolls
//! back, or disposes it.

use crate::context::{ContextTransaction, InitializedContexts, IsolationLevel, PersistenceContext};
use crate::error::ScopeError;
use crate::registry::ContextRegistry;
use core::any::TypeId;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct ContextEntry {
    context: Arc<dyn PersistenceContext>,
    /// Open explicit transaction, present only when the collection was
    /// configured with an isolation level and the context has not been
    /// committed or rolled back yet.
    transaction: Option<Box<dyn ContextTransaction>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<TypeId, ContextEntry>,
    disposed: bool,
}

/// Maintains the lazily-created persistence context instances of one scope
/// chain and finalizes them as a single atomic group.
///
/// # Invariant
///
/// Once a context instance exists for a type, every subsequent request for
/// that type from any scope in the chain returns the identical instance.
pub struct ContextCollection {
    registry: Arc<ContextRegistry>,
    read_only: bool,
    isolation: Option<IsolationLevel>,
    inner: Mutex<Inner>,
}

impl ContextCollection {
    pub(crate) fn new(
        registry: Arc<ContextRegistry>,
        read_only: bool,
        isolation: Option<IsolationLevel>,
    ) -> Self {
        Self {
            registry,
            read_only,
            isolation,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Whether contexts in this collection are constructed read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The explicit isolation level the collection was configured with, if any.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Gets or creates the context instance of type `T`.
    ///
    /// The first request constructs the context through the registry
    /// (forwarding the read-only flag) and, when an explicit isolation level
    /// was configured, opens a transaction at that level before the instance
    /// becomes visible. Construction failure propagates and caches nothing.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::CollectionDisposed`] if the collection was finalized
    /// - [`ScopeError::UnregisteredContext`] if `T` has no registered constructor
    /// - [`ScopeError::Context`] if construction or `begin_transaction` fails
    pub fn get<T: PersistenceContext>(&self) -> Result<Arc<T>, ScopeError> {
        let type_id = TypeId::of::<T>();

        {
            let inner = self.inner.lock();
            if inner.disposed {
                return Err(ScopeError::CollectionDisposed);
            }
            if let Some(entry) = inner.entries.get(&type_id) {
                return Ok(downcast_context::<T>(entry.context.clone()));
            }
        }

        // Construct outside the lock: constructors are user code and may
        // legitimately request other contexts from this same collection.
        let context = self
            .registry
            .construct(type_id, core::any::type_name::<T>(), self.read_only)?;
        let transaction = match self.isolation {
            Some(level) => Some(context.begin_transaction(level)?),
            None => None,
        };

        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(ScopeError::CollectionDisposed);
        }
        let entry = inner.entries.entry(type_id).or_insert(ContextEntry {
            context,
            transaction,
        });
        Ok(downcast_context::<T>(entry.context.clone()))
    }

    /// Returns `true` if a context of type `T` has been instantiated.
    #[must_use]
    pub fn contains<T: PersistenceContext>(&self) -> bool {
        self.inner.lock().entries.contains_key(&TypeId::of::<T>())
    }

    /// Number of contexts instantiated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if no context has been instantiated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of the instantiated contexts, for enumeration by the refresh
    /// mechanism and by parent-lookup.
    #[must_use]
    pub fn initialized_contexts(&self) -> InitializedContexts {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(type_id, entry)| (*type_id, entry.context.clone()))
            .collect()
    }

    /// Saves every instantiated context and commits any open transactions.
    ///
    /// Change counts are summed across contexts. The first failure aborts the
    /// remaining saves and propagates; no automatic rollback is attempted -
    /// the owning scope decides that on disposal.
    pub(crate) fn commit(&self) -> Result<usize, ScopeError> {
        let contexts = self.live_contexts()?;

        let mut written = 0;
        for context in &contexts {
            written += context.save_changes()?;
        }
        self.commit_transactions()?;
        Ok(written)
    }

    /// Cancellation-aware form of [`commit`](Self::commit).
    ///
    /// The token is checked before each context's save; a fired token aborts
    /// with [`ScopeError::Cancelled`], leaving already-saved contexts as they
    /// are (the owning scope remains not-completed and will roll back on
    /// disposal).
    pub(crate) async fn commit_async(
        &self,
        cancel: CancellationToken,
    ) -> Result<usize, ScopeError> {
        let contexts = self.live_contexts()?;

        let mut written = 0;
        for context in &contexts {
            if cancel.is_cancelled() {
                return Err(ScopeError::Cancelled);
            }
            written += context.save_changes_async(cancel.clone()).await?;
        }
        if cancel.is_cancelled() {
            return Err(ScopeError::Cancelled);
        }
        self.commit_transactions()?;
        Ok(written)
    }

    /// Rolls back every instantiated context, best-effort.
    ///
    /// Open transactions are aborted and pending tracked changes discarded on
    /// every context, continuing past individual failures so each context
    /// gets exactly one attempt. Failures are collected and reported as an
    /// aggregate rather than silently discarded.
    pub(crate) fn rollback(&self) -> Result<(), ScopeError> {
        let (contexts, transactions) = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return Err(ScopeError::CollectionDisposed);
            }
            let contexts: Vec<_> = inner
                .entries
                .values()
                .map(|entry| entry.context.clone())
                .collect();
            let transactions: Vec<_> = inner
                .entries
                .values_mut()
                .filter_map(|entry| entry.transaction.take())
                .collect();
            (contexts, transactions)
        };

        let mut failures = Vec::new();
        for transaction in transactions {
            if let Err(err) = transaction.rollback() {
                failures.push(err);
            }
        }
        for context in contexts {
            if let Err(err) = context.rollback_pending() {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScopeError::Rollback(failures))
        }
    }

    /// Disposes every instantiated context and any still-open transaction
    /// handles, regardless of commit state.
    ///
    /// Idempotent. Disposal failures are logged, never propagated - this runs
    /// on cleanup paths where raising would mask the original error.
    pub(crate) fn dispose(&self) {
        let drained: Vec<(TypeId, ContextEntry)> = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.entries.drain().collect()
        };

        for (_, entry) in drained {
            // Dropping an uncommitted handle aborts the transaction.
            drop(entry.transaction);
            if let Err(err) = entry.context.dispose() {
                tracing::warn!(
                    context = entry.context.type_name(),
                    error = %err,
                    "failed to dispose persistence context"
                );
            }
        }
    }

    fn live_contexts(&self) -> Result<Vec<Arc<dyn PersistenceContext>>, ScopeError> {
        let inner = self.inner.lock();
        if inner.disposed {
            return Err(ScopeError::CollectionDisposed);
        }
        Ok(inner
            .entries
            .values()
            .map(|entry| entry.context.clone())
            .collect())
    }

    fn commit_transactions(&self) -> Result<(), ScopeError> {
        let transactions: Vec<_> = {
            let mut inner = self.inner.lock();
            inner
                .entries
                .values_mut()
                .filter_map(|entry| entry.transaction.take())
                .collect()
        };
        for transaction in transactions {
            transaction.commit()?;
        }
        Ok(())
    }
}

fn downcast_context<T: PersistenceContext>(context: Arc<dyn PersistenceContext>) -> Arc<T> {
    context
        .downcast_arc::<T>()
        .unwrap_or_else(|_| unreachable!("context type keyed by TypeId cannot mismatch"))
}
