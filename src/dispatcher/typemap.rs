//! The process-wide type-to-providers map (spec.md §3 "Type-to-providers
//! map entry", §4.1 points 2 and "Schema check").

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::dispatcher::provider::ProviderHandle;
use crate::host::Dn;

#[derive(Default)]
struct TypeBinding {
    providers: Vec<ProviderHandle>,
    object_classes: HashSet<String>,
}

/// Registration key: either a bare lowercased base type, or a namespace +
/// type composite (spec.md §4.1 point 2: `"<namespace_ndn>::<type>"`).
fn binding_key(type_name: &str, namespace_dn: Option<&Dn>) -> String {
    let type_lower = type_name.to_ascii_lowercase();
    match namespace_dn {
        Some(dn) => format!("{}::{}", normalize_for_key(dn.as_str()), type_lower),
        None => type_lower,
    }
}

fn normalize_for_key(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// The dispatcher's exclusive registry mapping attribute base types (global
/// or namespace-qualified) to their ordered provider chains.
pub struct TypeMap {
    bindings: RwLock<HashMap<String, TypeBinding>>,
}

impl TypeMap {
    pub fn new() -> Self {
        TypeMap {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Binds `handle` to `type_name`, idempotently: registering the same
    /// `(handle, type)` pair twice leaves the chain unchanged (spec.md §8
    /// property 4).
    pub fn register_attribute(
        &self,
        handle: &ProviderHandle,
        type_name: &str,
        namespace_dn: Option<&Dn>,
    ) {
        let key = binding_key(type_name, namespace_dn);
        let mut bindings = self.bindings.write();
        let binding = bindings.entry(key).or_default();
        if !binding.providers.iter().any(|p| p.ptr_eq(handle)) {
            binding.providers.push(handle.clone());
        }
    }

    /// Also records `object_class` as one that permits `type_name`, for the
    /// schema check (spec.md §4.1 "Schema check").
    pub fn bind_schema(&self, type_name: &str, object_class: &str) {
        let key = binding_key(type_name, None);
        let mut bindings = self.bindings.write();
        bindings
            .entry(key)
            .or_default()
            .object_classes
            .insert(object_class.to_ascii_lowercase());
    }

    /// Returns the provider chain for `type_name`, preferring the
    /// namespace-qualified binding and falling back to the global one
    /// (spec.md §4.1 point 3 resolution step ii).
    pub fn chain_for(&self, type_name: &str, namespace_dn: Option<&Dn>) -> Vec<ProviderHandle> {
        let bindings = self.bindings.read();
        if let Some(dn) = namespace_dn {
            let ns_key = binding_key(type_name, Some(dn));
            if let Some(b) = bindings.get(&ns_key) {
                if !b.providers.is_empty() {
                    return b.providers.clone();
                }
            }
        }
        bindings
            .get(&binding_key(type_name, None))
            .map(|b| b.providers.clone())
            .unwrap_or_default()
    }

    /// Whether any provider has registered for `type_name` at all (used by
    /// the schema check to decide if an entry's object classes cover it).
    pub fn object_classes_for(&self, type_name: &str) -> HashSet<String> {
        self.bindings
            .read()
            .get(&binding_key(type_name, None))
            .map(|b| b.object_classes.clone())
            .unwrap_or_default()
    }

    /// Drops every registration. Called when the schema collaborator signals
    /// a change, forcing the schema-validity sets to be rebuilt by callers.
    pub fn clear_schema_bindings(&self) {
        for binding in self.bindings.write().values_mut() {
            binding.object_classes.clear();
        }
    }

    pub fn registered_type_count(&self) -> usize {
        self.bindings.read().len()
    }

    /// Every distinct provider handle registered under any binding, used by
    /// `list_types` to ask each provider which types it contributes for a
    /// given entry (spec.md §4.1 point 5).
    pub fn all_handles(&self) -> Vec<ProviderHandle> {
        let bindings = self.bindings.read();
        let mut seen: Vec<ProviderHandle> = Vec::new();
        for binding in bindings.values() {
            for handle in &binding.providers {
                if !seen.iter().any(|h| h.ptr_eq(handle)) {
                    seen.push(handle.clone());
                }
            }
        }
        seen
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::new()
    }
}
