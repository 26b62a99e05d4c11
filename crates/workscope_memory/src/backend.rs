//! Shared in-memory entity store.
//!
//! A [`MemoryBackend`] plays the role of the database: the durable state
//! persistence contexts load from and save to. It is cheaply cloneable and
//! shared by every context created over it; contexts never expose it to
//! business code directly.

use crate::context::Entity;
use core::any::{Any, TypeId};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Type-erased stored entity value.
pub(crate) type StoredEntity = Arc<dyn Any + Send + Sync>;

/// Process-shared entity store, keyed by entity type and key.
///
/// # Example
///
/// ```ignore
/// let backend = MemoryBackend::new();
/// backend.seed(User { id: 1, name: "ada".into() });
/// assert_eq!(backend.count::<User>(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<HashMap<(TypeId, u64), StoredEntity>>>,
}

impl MemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the entity of type `E` with the given key, if present.
    #[must_use]
    pub fn load<E: Entity>(&self, key: u64) -> Option<E> {
        self.inner
            .read()
            .get(&(TypeId::of::<E>(), key))
            .and_then(|stored| stored.downcast_ref::<E>())
            .cloned()
    }

    /// Number of stored entities of type `E`.
    #[must_use]
    pub fn count<E: Entity>(&self) -> usize {
        let type_id = TypeId::of::<E>();
        self.inner
            .read()
            .keys()
            .filter(|(stored_type, _)| *stored_type == type_id)
            .count()
    }

    /// All stored entities of type `E`, in key order.
    #[must_use]
    pub fn all<E: Entity>(&self) -> Vec<E> {
        let type_id = TypeId::of::<E>();
        let mut entities: Vec<E> = self
            .inner
            .read()
            .iter()
            .filter(|((stored_type, _), _)| *stored_type == type_id)
            .filter_map(|(_, stored)| stored.downcast_ref::<E>().cloned())
            .collect();
        entities.sort_by_key(Entity::key);
        entities
    }

    /// Writes an entity directly, bypassing change tracking.
    ///
    /// Intended for seeding test and demo data.
    pub fn seed<E: Entity>(&self, entity: E) {
        self.upsert(&entity);
    }

    pub(crate) fn upsert<E: Entity>(&self, entity: &E) {
        self.inner.write().insert(
            (TypeId::of::<E>(), entity.key()),
            Arc::new(entity.clone()),
        );
    }

    pub(crate) fn delete<E: Entity>(&self, key: u64) -> bool {
        self.inner.write().remove(&(TypeId::of::<E>(), key)).is_some()
    }

    /// Snapshot of every stored entity of one type, for transaction rollback.
    pub(crate) fn snapshot_of(&self, entity_type: TypeId) -> Vec<(u64, StoredEntity)> {
        self.inner
            .read()
            .iter()
            .filter(|((stored_type, _), _)| *stored_type == entity_type)
            .map(|((_, key), stored)| (*key, Arc::clone(stored)))
            .collect()
    }

    /// Replaces every stored entity of one type with the given snapshot.
    pub(crate) fn restore_of(&self, entity_type: TypeId, snapshot: Vec<(u64, StoredEntity)>) {
        let mut inner = self.inner.write();
        inner.retain(|(stored_type, _), _| *stored_type != entity_type);
        for (key, stored) in snapshot {
            inner.insert((entity_type, key), stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        id: u64,
        text: String,
    }

    impl Entity for Note {
        fn key(&self) -> u64 {
            self.id
        }
    }

    fn note(id: u64, text: &str) -> Note {
        Note {
            id,
            text: text.into(),
        }
    }

    #[test]
    fn seed_load_roundtrip() {
        let backend = MemoryBackend::new();
        backend.seed(note(1, "hello"));

        assert_eq!(backend.load::<Note>(1), Some(note(1, "hello")));
        assert_eq!(backend.load::<Note>(2), None);
        assert_eq!(backend.count::<Note>(), 1);
    }

    #[test]
    fn snapshot_restore_reverts_one_type_only() {
        #[derive(Clone, Debug, PartialEq)]
        struct Tag(u64);
        impl Entity for Tag {
            fn key(&self) -> u64 {
                self.0
            }
        }

        let backend = MemoryBackend::new();
        backend.seed(note(1, "before"));
        let snapshot = backend.snapshot_of(TypeId::of::<Note>());

        backend.seed(note(1, "after"));
        backend.seed(note(2, "new"));
        backend.seed(Tag(7));

        backend.restore_of(TypeId::of::<Note>(), snapshot);
        assert_eq!(backend.load::<Note>(1), Some(note(1, "before")));
        assert_eq!(backend.load::<Note>(2), None);
        // Other entity types are untouched by the restore.
        assert_eq!(backend.count::<Tag>(), 1);
    }

    #[test]
    fn all_returns_entities_in_key_order() {
        let backend = MemoryBackend::new();
        backend.seed(note(3, "c"));
        backend.seed(note(1, "a"));
        backend.seed(note(2, "b"));

        let keys: Vec<u64> = backend.all::<Note>().iter().map(Entity::key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
