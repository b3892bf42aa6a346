//! Committed registry
//!
//! The registry is the set of every batch whose token has not been released.
//! It is an arena keyed by generation-checked slot keys, so a stale key can
//! never alias a newer batch that reused its slot.
//!
//! [`LockedRegistry`] is the shared implementation: one mutex, held only for
//! the insert or remove itself. Batches are moved out before anything is
//! freed, so backend work never happens under the lock.
//! [`LocalRegistry`] is a single-threaded drop-in for deterministic tests.

use std::cell::RefCell;
use std::sync::{Mutex, MutexGuard, PoisonError};

use slotmap::{new_key_type, SlotMap};

use crate::backend::Backend;
use crate::graphics::data::{GraphicsData, ResourceCounts};

new_key_type! {
    /// Generation-checked key of a committed batch
    pub struct DataKey;
}

/// Storage for committed batches
pub trait Registry<B: Backend> {
    /// Insert a fully-built batch
    fn insert(&self, data: GraphicsData<B>) -> DataKey;

    /// Remove a batch, returning it so the caller can retire it
    fn remove(&self, key: DataKey) -> Option<GraphicsData<B>>;

    /// Remove every batch
    fn drain(&self) -> Vec<GraphicsData<B>>;

    /// Whether `key` is committed
    fn contains(&self, key: DataKey) -> bool;

    /// Object counts of a committed batch
    fn counts(&self, key: DataKey) -> Option<ResourceCounts>;

    /// Number of committed batches
    fn len(&self) -> usize;

    /// Whether nothing is committed
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-protected registry shared by every thread
pub struct LockedRegistry<B: Backend> {
    entries: Mutex<SlotMap<DataKey, GraphicsData<B>>>,
}

impl<B: Backend> Default for LockedRegistry<B> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(SlotMap::with_key()),
        }
    }
}

impl<B: Backend> LockedRegistry<B> {
    fn entries(&self) -> MutexGuard<'_, SlotMap<DataKey, GraphicsData<B>>> {
        // Entries are only moved in and out under the lock, so a poisoned
        // map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Backend> Registry<B> for LockedRegistry<B> {
    fn insert(&self, data: GraphicsData<B>) -> DataKey {
        self.entries().insert(data)
    }

    fn remove(&self, key: DataKey) -> Option<GraphicsData<B>> {
        self.entries().remove(key)
    }

    fn drain(&self) -> Vec<GraphicsData<B>> {
        self.entries().drain().map(|(_, data)| data).collect()
    }

    fn contains(&self, key: DataKey) -> bool {
        self.entries().contains_key(key)
    }

    fn counts(&self, key: DataKey) -> Option<ResourceCounts> {
        self.entries().get(key).map(GraphicsData::counts)
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Single-threaded registry with deterministic behaviour
pub struct LocalRegistry<B: Backend> {
    entries: RefCell<SlotMap<DataKey, GraphicsData<B>>>,
}

impl<B: Backend> Default for LocalRegistry<B> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(SlotMap::with_key()),
        }
    }
}

impl<B: Backend> Registry<B> for LocalRegistry<B> {
    fn insert(&self, data: GraphicsData<B>) -> DataKey {
        self.entries.borrow_mut().insert(data)
    }

    fn remove(&self, key: DataKey) -> Option<GraphicsData<B>> {
        self.entries.borrow_mut().remove(key)
    }

    fn drain(&self) -> Vec<GraphicsData<B>> {
        self.entries.borrow_mut().drain().map(|(_, data)| data).collect()
    }

    fn contains(&self, key: DataKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    fn counts(&self, key: DataKey) -> Option<ResourceCounts> {
        self.entries.borrow().get(key).map(GraphicsData::counts)
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn check_registry<R: Registry<HeadlessBackend> + Default>() {
        let registry = R::default();
        let first = registry.insert(GraphicsData::new());
        let second = registry.insert(GraphicsData::new());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(first));
        assert!(registry.remove(first).is_some());
        assert!(!registry.contains(first));
        assert!(registry.remove(first).is_none());

        // The freed slot is reused under a new generation
        let third = registry.insert(GraphicsData::new());
        assert_ne!(first, third);
        assert!(!registry.contains(first));
        assert!(registry.contains(third));

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
        assert!(!registry.contains(second));
    }

    /// The locked registry rejects stale keys after slot reuse
    #[test]
    fn test_locked_registry_generations() {
        check_registry::<LockedRegistry<HeadlessBackend>>();
    }

    /// The local registry behaves like the locked one
    #[test]
    fn test_local_registry_generations() {
        check_registry::<LocalRegistry<HeadlessBackend>>();
    }
}
