//! Cancellable one-shot timers and periodic task handles.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::task::JoinHandle;

/// Aborts the wrapped task when dropped, so whoever holds the handle owns
/// the task's lifetime.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    /// Detach without aborting. Used by a task that removes its own handle
    /// and must keep running.
    pub fn release(mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Identifies one arming of a key; a timer whose generation is stale was
/// superseded and must not act.
pub(crate) type Generation = u64;

/// At most one pending timer per key.
#[derive(Debug)]
pub(crate) struct TimerMap<K> {
    timers: HashMap<K, (Generation, AbortOnDrop)>,
    next_generation: Generation,
}

impl<K: Eq + Hash + Clone> TimerMap<K> {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Reserve the generation for the next [`arm`](Self::arm).
    pub fn next_generation(&mut self) -> Generation {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        generation
    }

    /// Install `handle` for `key`, cancelling any timer it supersedes.
    pub fn arm(&mut self, key: K, generation: Generation, handle: JoinHandle<()>) {
        self.timers.insert(key, (generation, AbortOnDrop::new(handle)));
    }

    /// Called by a timer when it fires. Returns `true` and forgets the entry
    /// if `generation` is still current for `key`; the firing task then runs
    /// to completion even if the key is re-armed.
    pub fn fire(&mut self, key: &K, generation: Generation) -> bool {
        match self.timers.get(key) {
            Some((current, _)) if *current == generation => {
                if let Some((_, handle)) = self.timers.remove(key) {
                    handle.release();
                }
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.timers.remove(key).is_some()
    }

    /// Cancel and return every key matching `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> Vec<K> {
        let keys: Vec<K> = self.timers.keys().filter(|k| pred(k)).cloned().collect();
        for key in &keys {
            self.timers.remove(key);
        }
        keys
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    #[cfg(test)]
    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.timers.len()
    }
}
