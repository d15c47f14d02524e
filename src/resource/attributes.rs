//! Typed attribute slots keyed by Rust type.
//!
//! Each attribute type gets one slot per resource. A slot is written once,
//! either explicitly with [`AttributeStore::insert`] or on first access with
//! [`AttributeStore::get_or_try_init`], and is immutable afterwards.
//! Concurrent first accesses share a single initialization.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// Attribute errors
#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    #[error("Attribute {0} is already set")]
    AlreadySet(&'static str),
}

#[derive(Default)]
pub struct AttributeStore {
    slots: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl AttributeStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<TypeId, Box<dyn Any + Send + Sync>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot<T: Send + Sync + 'static>(&self) -> Slot<T> {
        let mut slots = self.lock();
        let entry = slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Slot::<T>::default()));

        // Entries are keyed by `TypeId::of::<T>()`, so this always holds a `Slot<T>`
        match entry.downcast_ref::<Slot<T>>() {
            Some(slot) => slot.clone(),
            None => unreachable!("attribute slot for {} has another type", type_name::<T>()),
        }
    }

    /// The attribute of type `T`, if it has been set.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.lock()
            .get(&TypeId::of::<T>())?
            .downcast_ref::<Slot<T>>()?
            .get()
            .cloned()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.get::<T>().is_some()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Result<Arc<T>, AttributeError> {
        let value = Arc::new(value);
        self.slot::<T>()
            .set(value.clone())
            .map_err(|_| AttributeError::AlreadySet(type_name::<T>()))?;
        Ok(value)
    }

    /// Return the attribute of type `T`, computing it with `init` if absent.
    ///
    /// A failed `init` leaves the slot empty and returns its error.
    pub async fn get_or_try_init<T, E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot::<T>();
        let value = slot
            .get_or_try_init(|| async move { init().await.map(Arc::new) })
            .await?;
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Entropy(u32);

    #[derive(Debug, PartialEq)]
    struct Label(&'static str);

    #[tokio::test]
    async fn test_compute_if_absent_runs_once() {
        let store = AttributeStore::default();
        let calls = AtomicUsize::new(0);

        let first = store
            .get_or_try_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Entropy(7))
            })
            .await
            .unwrap();
        let second = store
            .get_or_try_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Entropy(8))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, Entropy(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_slot_empty() {
        let store = AttributeStore::default();

        let result = store
            .get_or_try_init(|| async { Err::<Entropy, _>("engine exploded") })
            .await;
        assert_eq!(result.unwrap_err(), "engine exploded");
        assert!(!store.contains::<Entropy>());

        let value = store
            .get_or_try_init(|| async { Ok::<_, &str>(Entropy(1)) })
            .await
            .unwrap();
        assert_eq!(*value, Entropy(1));
    }

    #[test]
    fn test_slots_are_per_type() {
        let store = AttributeStore::default();
        store.insert(Entropy(3)).unwrap();
        store.insert(Label("elf")).unwrap();

        assert_eq!(*store.get::<Entropy>().unwrap(), Entropy(3));
        assert_eq!(*store.get::<Label>().unwrap(), Label("elf"));
        assert!(matches!(
            store.insert(Entropy(4)),
            Err(AttributeError::AlreadySet(_))
        ));
        assert_eq!(*store.get::<Entropy>().unwrap(), Entropy(3));
    }

    #[tokio::test]
    async fn test_inserted_value_is_shared_with_lazy_reads() {
        let store = AttributeStore::default();
        let inserted = store.insert(Label("fs")).unwrap();

        let read = store
            .get_or_try_init(|| async { Ok::<_, ()>(Label("never built")) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&inserted, &read));

        let entropy = store
            .get_or_try_init(|| async { Ok::<_, ()>(Entropy(9)) })
            .await
            .unwrap();
        assert_eq!(*entropy, Entropy(9));
        assert!(Arc::ptr_eq(&store.get::<Label>().unwrap(), &inserted));
    }
}
