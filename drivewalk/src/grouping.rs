use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// How many directories one listing query may cover.
///
/// Grouped queries (`'a' in parents or 'b' in parents`) sometimes come back
/// empty even though the directories are not. When that happens the group
/// size drops to one and the directories involved are remembered as
/// suspects. Each suspect later listed on its own and found genuinely empty
/// is cleared; once none remain the drop is treated as a false alarm and
/// grouping is restored.
#[derive(Debug)]
pub struct GroupingState {
    size: AtomicUsize,
    default: usize,
    suspects: Mutex<HashSet<String>>,
}

impl GroupingState {
    pub fn new(default: usize) -> Self {
        let default = default.max(1);
        Self {
            size: AtomicUsize::new(default),
            default,
            suspects: Mutex::new(HashSet::new()),
        }
    }

    pub fn group_size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn default_size(&self) -> usize {
        self.default
    }

    pub fn is_grouping_disabled(&self) -> bool {
        self.group_size() == 1 && self.default > 1
    }

    /// Records an empty multi-directory batch and drops the group size to
    /// one. `requeue` runs under the suspect lock, after every ID has been
    /// recorded, so a requeued directory can never be cleared before it is
    /// known as a suspect. Returns whether this call disabled grouping.
    pub fn suspect_batch<'a, I, F>(&self, ids: I, requeue: F) -> bool
    where
        I: IntoIterator<Item = &'a str>,
        F: FnOnce(),
    {
        let mut suspects = self.lock_suspects();
        let before = suspects.len();
        for id in ids {
            suspects.insert(id.to_string());
        }
        let disabled = self.size.swap(1, Ordering::AcqRel) != 1;
        if disabled {
            debug!(
                suspects = suspects.len() - before,
                "disabling grouped listing: multi-directory query returned no entries"
            );
        }
        requeue();
        disabled
    }

    /// Clears a singleton that listed empty. Returns whether grouping was
    /// restored as a result.
    pub fn clear_suspect(&self, id: &str) -> bool {
        let mut suspects = self.lock_suspects();
        if !suspects.remove(id) || !suspects.is_empty() {
            return false;
        }
        let restored = self.size.swap(self.default, Ordering::AcqRel) != self.default;
        if restored {
            debug!(size = self.default, "re-enabling grouped listing: suspected directories were empty");
        }
        restored
    }

    pub fn suspect_count(&self) -> usize {
        self.lock_suspects().len()
    }

    fn lock_suspects(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.suspects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
