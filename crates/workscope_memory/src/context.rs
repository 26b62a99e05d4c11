//! Change-tracking persistence context over the in-memory store.
//!
//! [`EntityContext<E>`] is the reference implementation of
//! [`PersistenceContext`]: a first-level cache that tracks every entity it
//! has seen together with an [`EntityState`], applies the pending states to
//! the [`MemoryBackend`] on save, and supports snapshot transactions at an
//! explicit isolation level. One context type per entity type keeps the
//! scope engine's "at most one instance per type" invariant meaningful.

use crate::backend::{MemoryBackend, StoredEntity};
use core::any::TypeId;
use hashbrown::HashMap;
use parking_lot::Mutex;
use workscope_core::context::{ContextTransaction, IsolationLevel, PersistenceContext};
use workscope_core::error::ContextError;

/// A value that can live in a [`MemoryBackend`] and be tracked by an
/// [`EntityContext`].
pub trait Entity: Clone + Send + Sync + 'static {
    /// The entity's store key.
    fn key(&self) -> u64;
}

/// Tracked state of one entity within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Loaded from the store and not modified since.
    Unchanged,
    /// New entity; will be inserted on save.
    Added,
    /// Loaded and modified; will be written on save.
    Modified,
    /// Marked for removal; will be deleted on save.
    Deleted,
}

struct TrackedEntry<E> {
    entity: E,
    state: EntityState,
}

struct ContextInner<E> {
    entries: HashMap<u64, TrackedEntry<E>>,
    closed: bool,
}

/// In-memory persistence context for entities of type `E`.
///
/// Constructed through the scope engine's
/// [`ContextRegistry`](workscope_core::registry::ContextRegistry):
///
/// ```ignore
/// let registry = ContextRegistry::new()
///     .register::<EntityContext<User>, _>(move |read_only| {
///         Ok(EntityContext::new(backend.clone(), read_only))
///     });
/// ```
///
/// A read-only context has change tracking disabled: reads do not register
/// tracked entries, writes are rejected, and save reports zero changes.
pub struct EntityContext<E: Entity> {
    backend: MemoryBackend,
    track_changes: bool,
    inner: Mutex<ContextInner<E>>,
}

impl<E: Entity> EntityContext<E> {
    /// Creates a context over the given store.
    #[must_use]
    pub fn new(backend: MemoryBackend, read_only: bool) -> Self {
        Self {
            backend,
            track_changes: !read_only,
            inner: Mutex::new(ContextInner {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Whether this context tracks changes.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.track_changes
    }

    /// Loads the entity with the given key, from the first-level cache if it
    /// is tracked, from the store otherwise.
    pub fn find(&self, key: u64) -> Result<Option<E>, ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;

        if let Some(entry) = inner.entries.get(&key) {
            return Ok(match entry.state {
                EntityState::Deleted => None,
                _ => Some(entry.entity.clone()),
            });
        }

        let Some(entity) = self.backend.load::<E>(key) else {
            return Ok(None);
        };
        if self.track_changes {
            inner.entries.insert(
                key,
                TrackedEntry {
                    entity: entity.clone(),
                    state: EntityState::Unchanged,
                },
            );
        }
        Ok(Some(entity))
    }

    /// Tracks a new entity for insertion on save.
    pub fn add(&self, entity: E) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;
        self.check_writable()?;

        let key = entity.key();
        let state = match inner.entries.get(&key).map(|entry| entry.state) {
            None => EntityState::Added,
            // Re-adding a deleted entity is a replacement write.
            Some(EntityState::Deleted) => EntityState::Modified,
            Some(_) => {
                return Err(ContextError::new(format!(
                    "entity with key {key} is already tracked"
                )));
            }
        };
        inner.entries.insert(key, TrackedEntry { entity, state });
        Ok(())
    }

    /// Tracks a modification to an entity.
    ///
    /// Entities not yet tracked are attached as modified.
    pub fn update(&self, entity: E) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;
        self.check_writable()?;

        let key = entity.key();
        let state = match inner.entries.get(&key).map(|entry| entry.state) {
            // An added entity stays an insert, whatever happens to it since.
            Some(EntityState::Added) => EntityState::Added,
            _ => EntityState::Modified,
        };
        inner.entries.insert(key, TrackedEntry { entity, state });
        Ok(())
    }

    /// Marks the entity with the given key for deletion on save.
    pub fn delete(&self, key: u64) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;
        self.check_writable()?;

        match inner.entries.get(&key).map(|entry| entry.state) {
            // Deleting a not-yet-saved insert just forgets it.
            Some(EntityState::Added) => {
                inner.entries.remove(&key);
                Ok(())
            }
            Some(_) => {
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.state = EntityState::Deleted;
                }
                Ok(())
            }
            None => match self.backend.load::<E>(key) {
                Some(entity) => {
                    inner.entries.insert(
                        key,
                        TrackedEntry {
                            entity,
                            state: EntityState::Deleted,
                        },
                    );
                    Ok(())
                }
                None => Err(ContextError::new(format!("no entity with key {key}"))),
            },
        }
    }

    /// The tracked state of the entity with the given key, if any.
    #[must_use]
    pub fn state_of(&self, key: u64) -> Option<EntityState> {
        self.inner.lock().entries.get(&key).map(|entry| entry.state)
    }

    /// Number of entities currently tracked.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Reloads the entity with the given key from the store, but only when
    /// it is tracked [`Unchanged`](EntityState::Unchanged).
    ///
    /// Returns `true` when a refresh happened. Pending local edits
    /// (added/modified/deleted entries) are deliberately left alone.
    pub(crate) fn refresh_unchanged(&self, key: u64) -> Result<bool, ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;

        if inner.entries.get(&key).map(|entry| entry.state) != Some(EntityState::Unchanged) {
            return Ok(false);
        }
        match self.backend.load::<E>(key) {
            Some(entity) => {
                inner.entries.insert(
                    key,
                    TrackedEntry {
                        entity,
                        state: EntityState::Unchanged,
                    },
                );
            }
            // Deleted underneath us; stop tracking the stale copy.
            None => {
                inner.entries.remove(&key);
            }
        }
        Ok(true)
    }

    fn check_open(&self, inner: &ContextInner<E>) -> Result<(), ContextError> {
        if inner.closed {
            return Err(ContextError::new(format!(
                "{} has been disposed",
                core::any::type_name::<Self>()
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), ContextError> {
        if !self.track_changes {
            return Err(ContextError::new(format!(
                "{} is read-only",
                core::any::type_name::<Self>()
            )));
        }
        Ok(())
    }
}

impl<E: Entity> PersistenceContext for EntityContext<E> {
    fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> Result<Box<dyn ContextTransaction>, ContextError> {
        {
            let inner = self.inner.lock();
            self.check_open(&inner)?;
        }
        Ok(Box::new(MemoryTransaction {
            backend: self.backend.clone(),
            entity_type: TypeId::of::<E>(),
            snapshot: Some(self.backend.snapshot_of(TypeId::of::<E>())),
            level,
        }))
    }

    fn save_changes(&self) -> Result<usize, ContextError> {
        let mut inner = self.inner.lock();
        self.check_open(&inner)?;
        if !self.track_changes {
            return Ok(0);
        }

        let mut written = 0;
        let mut deleted_keys = Vec::new();
        for (key, entry) in inner.entries.iter_mut() {
            match entry.state {
                EntityState::Added | EntityState::Modified => {
                    self.backend.upsert(&entry.entity);
                    entry.state = EntityState::Unchanged;
                    written += 1;
                }
                EntityState::Deleted => {
                    self.backend.delete::<E>(*key);
                    deleted_keys.push(*key);
                    written += 1;
                }
                EntityState::Unchanged => {}
            }
        }
        for key in deleted_keys {
            inner.entries.remove(&key);
        }
        Ok(written)
    }

    fn rollback_pending(&self) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        // Dropping pending entries reverts the cache: the next find reloads
        // the store's version.
        inner
            .entries
            .retain(|_, entry| entry.state == EntityState::Unchanged);
        Ok(())
    }

    fn dispose(&self) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.entries.clear();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryTransaction
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot transaction over one entity type.
///
/// Taking the transaction snapshots the store's slice for that entity type;
/// rollback restores it wholesale. Dropping an open handle aborts.
pub struct MemoryTransaction {
    backend: MemoryBackend,
    entity_type: TypeId,
    snapshot: Option<Vec<(u64, StoredEntity)>>,
    level: IsolationLevel,
}

impl ContextTransaction for MemoryTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    fn commit(mut self: Box<Self>) -> Result<(), ContextError> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), ContextError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.backend.restore_of(self.entity_type, snapshot);
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            tracing::debug!("open transaction dropped; restoring snapshot");
            self.backend.restore_of(self.entity_type, snapshot);
        }
    }
}
