//! Per-entry memoisation of resolved virtual attribute values (spec.md §3
//! "Entry vattr cache", §4.1 "Per-entry cache").
//!
//! The real entry object lives in the host; this crate only ever sees it
//! through `&dyn Entry`, so the cache is kept as a side table keyed by
//! `EntryId` rather than embedded in the entry struct itself.

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::host::{EntryId, ValueSet};

/// `None` stored for a key means the attribute is cached as absent (spec.md
/// §3: "value set may be the distinguished absent marker").
type PerEntryMap = RwLock<std::collections::HashMap<String, Option<ValueSet>>>;

#[derive(Default)]
pub struct EntryVattrCache {
    entries: DashMap<EntryId, PerEntryMap>,
    /// Rising watermark: bumping it logically ages every entry's cache at
    /// once without walking the whole table (spec.md §4.1 "Per-entry
    /// cache").
    watermark: std::sync::atomic::AtomicU64,
}

impl EntryVattrCache {
    pub fn new() -> Self {
        EntryVattrCache {
            entries: DashMap::new(),
            watermark: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Looks up a cached outcome for `(entry, type_name)`. `Some(None)` means
    /// "cached as absent"; `None` means no cache entry exists.
    pub fn get(&self, entry_id: EntryId, type_name: &str) -> Option<Option<ValueSet>> {
        let per_entry = self.entries.get(&entry_id)?;
        per_entry.read().get(&type_name.to_ascii_lowercase()).cloned()
    }

    pub fn put(&self, entry_id: EntryId, type_name: &str, value: Option<ValueSet>) {
        let per_entry = self.entries.entry(entry_id).or_default();
        per_entry
            .write()
            .insert(type_name.to_ascii_lowercase(), value);
    }

    /// Wholesale invalidation of a single entry's cache (e.g. after a write
    /// to that entry).
    pub fn invalidate_entry(&self, entry_id: EntryId) {
        self.entries.remove(&entry_id);
    }

    /// Invalidates every entry's cache at once — used after a COS/roles
    /// snapshot rebuild or a schema change (spec.md §3 invariant: "the
    /// per-entry vattr cache is invalidated wholesale on schema or
    /// definition change").
    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.watermark
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.load(std::sync::atomic::Ordering::SeqCst)
    }
}
