use std::sync::{Arc, Mutex};

use vas::filter::Filter;
use vas::host::{Backend, Dn, Entry, Scope, SchemaSource};

/// An in-memory `Backend` over a flat, growable entry list — enough to
/// exercise searches scoped by subtree/one-level without a real store.
pub struct MemoryBackend {
    suffixes: Vec<Dn>,
    entries: Mutex<Vec<Arc<dyn Entry>>>,
}

impl MemoryBackend {
    pub fn new(suffixes: Vec<Dn>, entries: Vec<Arc<dyn Entry>>) -> Arc<Self> {
        Arc::new(MemoryBackend {
            suffixes,
            entries: Mutex::new(entries),
        })
    }

    pub fn add(&self, entry: Arc<dyn Entry>) {
        self.entries.lock().unwrap().push(entry);
    }
}

impl Backend for MemoryBackend {
    fn naming_contexts(&self) -> Vec<Dn> {
        self.suffixes.clone()
    }

    fn search(&self, base: &Dn, scope: Scope, filter: &Filter) -> Vec<Arc<dyn Entry>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| match scope {
                Scope::Base => e.dn().is_equal(base),
                Scope::OneLevel => e.dn().parent().map(|p| p.is_equal(base)).unwrap_or(false),
                Scope::Subtree => base.is_ancestor_of(e.dn()),
            })
            .filter(|e| filter.matches(e.as_ref()))
            .cloned()
            .collect()
    }

    fn get_entry(&self, dn: &Dn) -> Option<Arc<dyn Entry>> {
        self.entries.lock().unwrap().iter().find(|e| e.dn().is_equal(dn)).cloned()
    }
}

pub struct NoSchema;
impl SchemaSource for NoSchema {
    fn schema_check_enabled(&self) -> bool {
        false
    }
    fn object_classes_for_attribute(&self, _attr_type: &str) -> Vec<String> {
        Vec::new()
    }
}
