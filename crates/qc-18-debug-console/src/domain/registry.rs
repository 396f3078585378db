//! Monitored key registry
//!
//! Process-wide set of keys the operator wants traced, each bound to the
//! sink that receives the trace output. A key is present if and only if
//! tracing is enabled for it.
//!
//! ## Invariants
//!
//! - First writer wins: adding a key that is already present never rebinds
//!   its sink.
//! - Readers never block each other. Every operation takes the lock exactly
//!   once, so a concurrent reader sees the map either before or after a
//!   write.

use crate::domain::monitor::MonitorKey;
use crate::domain::sink::OutputSink;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct KeyRegistry {
    entries: RwLock<HashMap<MonitorKey, OutputSink>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key` bound to `sink`. Returns false if it was already
    /// present, in which case the existing sink is kept.
    pub fn add(&self, key: MonitorKey, sink: OutputSink) -> bool {
        match self.entries.write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(sink);
                true
            }
        }
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes `key` only while it is still bound to `sink`.
    pub fn remove_if_bound(&self, key: &[u8], sink: &OutputSink) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(bound) if bound.same_destination(sink) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes the key if present, adds it otherwise. Returns true when
    /// the key was added.
    pub fn toggle(&self, key: MonitorKey, sink: OutputSink) -> bool {
        let mut entries = self.entries.write();
        if entries.remove(key.as_bytes()).is_some() {
            false
        } else {
            entries.insert(key, sink);
            true
        }
    }

    /// Returns the sink of the first key in `keys` that is present.
    pub fn is_monitored(&self, keys: &[&[u8]]) -> Option<OutputSink> {
        let entries = self.entries.read();
        keys.iter().find_map(|key| entries.get(*key).cloned())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the monitored keys.
    pub fn keys(&self) -> Vec<MonitorKey> {
        self.entries.read().keys().cloned().collect()
    }

    /// Drops every entry. Called at process shutdown.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Watches `key` until the returned guard is dropped.
    ///
    /// Returns `None` if the key is already watched; the existing watch is
    /// left alone and nothing is removed later.
    pub fn watch_temporarily(
        self: &Arc<Self>,
        key: MonitorKey,
        sink: OutputSink,
    ) -> Option<WatchGuard> {
        self.add(key.clone(), sink.clone()).then(|| WatchGuard {
            registry: Arc::clone(self),
            key,
            sink,
        })
    }
}

/// Removes a temporarily watched key on drop, unless it has been rebound
/// to another sink in the meantime.
#[derive(Debug)]
#[must_use = "the key is unwatched as soon as the guard is dropped"]
pub struct WatchGuard {
    registry: Arc<KeyRegistry>,
    key: MonitorKey,
    sink: OutputSink,
}

impl WatchGuard {
    pub fn key(&self) -> &MonitorKey {
        &self.key
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.registry.remove_if_bound(self.key.as_bytes(), &self.sink);
    }
}
