use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Path ⇄ directory ID mapping shared with the crawl.
///
/// Paths are relative to the listing root, without leading or trailing
/// slashes; the root itself is `""`. IDs may be composite.
pub trait DirCache: Send + Sync {
    fn find_dir(&self, path: &str) -> Option<String>;
    fn put(&self, path: &str, id: &str);
    fn lookup_path(&self, id: &str) -> Option<String>;
    /// Forgets `path` and everything below it.
    fn flush(&self, path: &str);
}

#[derive(Default)]
struct Maps {
    by_path: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryDirCache {
    maps: RwLock<Maps>,
}

impl MemoryDirCache {
    pub fn new(root_id: &str) -> Self {
        let cache = Self::default();
        cache.put("", root_id);
        cache
    }

    pub fn len(&self) -> usize {
        self.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DirCache for MemoryDirCache {
    fn find_dir(&self, path: &str) -> Option<String> {
        self.read().by_path.get(path).cloned()
    }

    fn put(&self, path: &str, id: &str) {
        let mut maps = self.write();
        if let Some(old) = maps.by_path.insert(path.to_string(), id.to_string()) {
            if old != id {
                maps.by_id.remove(&old);
            }
        }
        maps.by_id.insert(id.to_string(), path.to_string());
    }

    fn lookup_path(&self, id: &str) -> Option<String> {
        self.read().by_id.get(id).cloned()
    }

    fn flush(&self, path: &str) {
        let mut maps = self.write();
        let prefix = format!("{path}/");
        let doomed: Vec<String> = maps
            .by_path
            .keys()
            .filter(|key| path.is_empty() || key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(id) = maps.by_path.remove(&key) {
                maps.by_id.remove(&id);
            }
        }
    }
}

/// Resource keys of folders seen during listing, keyed by actual folder ID.
#[derive(Default)]
pub struct ResourceKeys {
    keys: RwLock<HashMap<String, String>>,
}

impl ResourceKeys {
    pub fn record(&self, id: &str, key: &str) {
        if key.is_empty() {
            return;
        }
        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.to_string(), key.to_string());
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }
}
