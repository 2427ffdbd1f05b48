use std::fmt;

use dashmap::DashMap;

/// Per-key engine state.
///
/// Each engine owns one store. Entries are created lazily on first access and
/// every closure passed to [`KeyedStore::with_entry`] runs while the entry is
/// exclusively locked, which makes an engine's check-then-mutate sequence
/// atomic per key while distinct keys proceed in parallel.
///
/// Closures must not call back into the same store; the shard lock is held.
pub struct KeyedStore<S> {
    entries: DashMap<String, S>,
}

impl<S> KeyedStore<S> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Runs `f` on the state for `key`, creating it with `init` first if absent.
    pub fn with_entry<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        // Existing keys are the hot path; avoid allocating the owned key for them.
        if let Some(mut entry) = self.entries.get_mut(key) {
            return f(entry.value_mut());
        }
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(init);
        f(entry.value_mut())
    }

    /// Runs `f` on the state for `key` only if it already exists.
    pub fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.entries
            .get_mut(key)
            .map(|mut entry| f(entry.value_mut()))
    }

    pub fn remove(&self, key: &str) -> Option<S> {
        self.entries.remove(key).map(|(_, state)| state)
    }

    /// Keeps only the entries for which `f` returns `true`.
    pub fn retain(&self, mut f: impl FnMut(&str, &mut S) -> bool) {
        self.entries.retain(|key, state| f(key, state));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for KeyedStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for KeyedStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStore")
            .field("keys", &self.entries.len())
            .finish()
    }
}
