use parking_lot::Mutex;
use std::{collections::HashMap, hash::Hash, sync::Arc};

type Cell<V> = Arc<Mutex<Option<V>>>;

/// A keyed cache of long-lived values with exactly-once construction.
///
/// The registry is an ordinary value owned by the application's composition
/// root; there is no process-global state. For every key at most one
/// initializer runs successfully, even when many threads ask for the same key
/// at once. Threads racing on one key wait for the winner; other keys are not
/// blocked while an initializer runs. A failed initializer leaves the key
/// vacant so a later call can retry.
///
/// # Example
///
/// ```
/// use slotflake::Registry;
///
/// let registry: Registry<&str, u32> = Registry::new();
/// let first = registry.get_or_try_insert_with("a", || Ok::<_, ()>(1)).unwrap();
/// let second = registry.get_or_try_insert_with("a", || Ok::<_, ()>(2)).unwrap();
/// assert_eq!((first, second), (1, 1));
/// ```
pub struct Registry<K, V> {
    entries: Mutex<HashMap<K, Cell<V>>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, running `init` to create it if absent.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`; the key stays vacant.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let cell = Arc::clone(self.entries.lock().entry(key).or_default());

        let mut slot = cell.lock();
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        match init() {
            Ok(value) => {
                *slot = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                // Cells are only cloned under the map lock, so nobody else is
                // waiting on this one when the map holds the last other handle.
                let mut entries = self.entries.lock();
                if Arc::strong_count(&cell) == 2 {
                    entries.retain(|_, other| !Arc::ptr_eq(other, &cell));
                }
                Err(err)
            }
        }
    }

    /// Returns the value for `key` if one has been constructed.
    pub fn get(&self, key: &K) -> Option<V> {
        let cell = self.entries.lock().get(key).map(Arc::clone)?;
        cell.lock().clone()
    }

    /// Removes and returns the value for `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let cell = self.entries.lock().remove(key)?;
        cell.lock().take()
    }

    /// Number of constructed values.
    pub fn len(&self) -> usize {
        let cells: Vec<Cell<V>> = self.entries.lock().values().map(Arc::clone).collect();
        cells.iter().filter(|cell| cell.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
