//! Latest-value cache of every dataref seen on the connection.
//!
//! The host pushes updates continuously after subscription, so value getters
//! read from this cache rather than asking the host. The receive loop is
//! the only writer of values; callers read concurrently from any task or
//! thread.
//!
//! Entries are stored as `Arc<DataRef>` and replaced wholesale on every
//! update, so a reader never observes a type from one update paired with a
//! value from another.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use extplane_core::DataRef;

use crate::codec::UpdateEvent;

/// In-memory map from dataref name to its latest snapshot.
///
/// No eviction and no history: only the latest value is kept, and entries
/// survive `stop()` so the last known values stay readable.
#[derive(Debug, Default)]
pub struct DataRefStore {
    entries: RwLock<HashMap<String, Arc<DataRef>>>,
}

impl DataRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for `name`, if the dataref is known.
    pub fn get(&self, name: &str) -> Option<Arc<DataRef>> {
        self.read().get(name).cloned()
    }

    /// Apply an inbound update and return the published snapshot.
    ///
    /// Replaces the value. The type is taken from the update only if it was
    /// previously unknown; the accuracy requested at subscribe time is kept.
    pub fn apply_update(&self, event: &UpdateEvent) -> Arc<DataRef> {
        let mut entries = self.write();
        let previous = entries.get(&event.name);

        let data_type = match previous.and_then(|p| p.data_type) {
            Some(known) => {
                if known != event.data_type {
                    tracing::warn!(
                        dataref = %event.name,
                        known = %known,
                        reported = %event.data_type,
                        "Host reported a different type for a known dataref"
                    );
                }
                known
            }
            None => event.data_type,
        };

        let snapshot = Arc::new(DataRef {
            name: event.name.clone(),
            data_type: Some(data_type),
            values: Some(event.values.clone()),
            accuracy: previous.and_then(|p| p.accuracy),
        });
        entries.insert(event.name.clone(), Arc::clone(&snapshot));
        snapshot
    }

    /// Pre-register a dataref at subscribe time.
    ///
    /// Creates an entry with unknown type and value if none exists. For an
    /// existing entry only the accuracy is updated (when given); a known
    /// value is never cleared.
    pub fn declare(&self, name: &str, accuracy: Option<f32>) {
        let mut entries = self.write();
        match entries.get(name) {
            Some(existing) => {
                if accuracy.is_some() && existing.accuracy != accuracy {
                    let updated = DataRef {
                        accuracy,
                        ..DataRef::clone(existing)
                    };
                    entries.insert(name.to_string(), Arc::new(updated));
                }
            }
            None => {
                let entry = DataRef {
                    accuracy,
                    ..DataRef::new(name)
                };
                entries.insert(name.to_string(), Arc::new(entry));
            }
        }
    }

    /// Names of all known datarefs, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written entry
    // (entries are replaced, not mutated), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<DataRef>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<DataRef>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
