//! C13 — DataConsistencyRealm and its process-wide weak-pointer registry
//! (SPEC_FULL.md §4.13, spec.md §3).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use regfab_types::VersionNumber;

/// Opaque, backend-supplied sequence number (e.g. a device-side interrupt
/// counter) used to key a [`DataConsistencyRealm`].
pub type DataConsistencyKey = u64;

/// Ordered ring buffer of `(key, version)` entries shared by all registers
/// that participate in the same consistency group. Keys are numerically
/// ordered: within the retained window, increasing keys yield non-decreasing
/// versions (spec.md §3).
pub struct DataConsistencyRealm {
    name: String,
    capacity: usize,
    entries: Mutex<VecDeque<(DataConsistencyKey, VersionNumber)>>,
}

impl DataConsistencyRealm {
    fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self { name: name.into(), capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idempotent for a key already in the window; allocates a fresh,
    /// strictly increasing version otherwise, evicting the oldest entry if
    /// the ring is full. A key older than the oldest retained key returns
    /// [`VersionNumber::none`] as the out-of-window sentinel.
    pub fn get_version(&self, key: DataConsistencyKey) -> VersionNumber {
        let mut entries = self.entries.lock().unwrap();
        if let Some((_, version)) = entries.iter().find(|(k, _)| *k == key) {
            return *version;
        }
        if let Some((oldest, _)) = entries.front() {
            if key < *oldest {
                return VersionNumber::none();
            }
        }
        let version = VersionNumber::new();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((key, version));
        version
    }
}

static REGISTRY: Lazy<Mutex<HashMap<String, Weak<DataConsistencyRealm>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

const DEFAULT_REALM_CAPACITY: usize = 64;

/// Process-wide weak-pointer registry: the first request for a named realm
/// creates it, and it lives only as long as some holder keeps a strong
/// reference (typically a device facade or a backend instance).
pub struct DataConsistencyRealmStore;

impl DataConsistencyRealmStore {
    pub fn get_or_create(name: &str) -> Arc<DataConsistencyRealm> {
        let mut registry = REGISTRY.lock().unwrap();
        if let Some(existing) = registry.get(name).and_then(Weak::upgrade) {
            return existing;
        }
        let realm = Arc::new(DataConsistencyRealm::new(name, DEFAULT_REALM_CAPACITY));
        registry.insert(name.to_string(), Arc::downgrade(&realm));
        realm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_key_is_idempotent() {
        let realm = DataConsistencyRealm::new("realm-a", 4);
        let v1 = realm.get_version(10);
        let v2 = realm.get_version(10);
        assert_eq!(v1, v2);
    }

    #[test]
    fn increasing_keys_get_non_decreasing_versions() {
        let realm = DataConsistencyRealm::new("realm-b", 4);
        let v1 = realm.get_version(1);
        let v2 = realm.get_version(2);
        assert!(v2 > v1);
    }

    #[test]
    fn ring_evicts_oldest_and_reports_out_of_window() {
        let realm = DataConsistencyRealm::new("realm-c", 2);
        realm.get_version(1);
        realm.get_version(2);
        realm.get_version(3); // evicts key 1
        assert_eq!(realm.get_version(1), VersionNumber::none());
    }

    #[test]
    fn store_returns_same_instance_while_referenced() {
        let a = DataConsistencyRealmStore::get_or_create("shared");
        let b = DataConsistencyRealmStore::get_or_create("shared");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
