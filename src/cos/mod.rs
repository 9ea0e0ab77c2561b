//! Class of Service cache (spec.md §4.2): computes attribute values from
//! COS definitions and templates found elsewhere in the directory, cached
//! as one atomically-swapped snapshot and kept fresh by a background
//! updater subscribed to the change-notify bus.

pub mod build;
pub mod definition;
pub mod query;
pub mod snapshot;
pub mod updater;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::VasConfig;
use crate::dispatcher::{
    Dispatcher, ProviderCompareOutcome, ProviderOutcome, VattrContext, VattrFlags, VirtualAttributeProvider,
};
use crate::host::{names, Backend, Entry, SchemaSource, Value, ViewsApi};

pub use definition::{AttributeMarkers, CosDefinition, CosScheme, CosTemplate};
pub use snapshot::{CosSnapshot, CosSnapshotInner};
pub use updater::{BackgroundUpdater, Rebuildable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CosError {
    #[error("COS recursion ceiling reached")]
    LoopDetected,
}

/// The live COS cache: current snapshot plus the collaborators needed to
/// rebuild it and to resolve specifiers/indirect targets at query time.
pub struct CosCache {
    snapshot: RwLock<CosSnapshot>,
    dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn Backend>,
    schema: Arc<dyn SchemaSource>,
    views: RwLock<Option<Arc<dyn ViewsApi>>>,
    config: VasConfig,
}

impl CosCache {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        backend: Arc<dyn Backend>,
        schema: Arc<dyn SchemaSource>,
        config: VasConfig,
    ) -> Arc<Self> {
        Arc::new(CosCache {
            snapshot: RwLock::new(Arc::new(CosSnapshotInner::empty())),
            dispatcher,
            backend,
            schema,
            views: RwLock::new(None),
            config,
        })
    }

    /// Wires in the Views collaborator so target-tree scoping can fall back
    /// to view membership (spec.md §4.5 integration note). Optional: a host
    /// without the Views plug-in loaded simply never calls this.
    pub fn set_views(&self, views: Arc<dyn ViewsApi>) {
        *self.views.write() = Some(views);
    }

    pub fn snapshot(&self) -> CosSnapshot {
        self.snapshot.read().clone()
    }

    /// Every distinct attribute name any current definition provides, used
    /// to (re-)register this cache with the dispatcher after each rebuild
    /// (spec.md §4.2 build step "register with the dispatcher").
    pub fn provided_attribute_names(&self) -> Vec<String> {
        let snap = self.snapshot();
        let mut names: Vec<String> = snap.attr_index.iter().map(|e| e.attr_name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn register_with_dispatcher(self: &Arc<Self>, handle: &crate::dispatcher::ProviderHandle) {
        for attr in self.provided_attribute_names() {
            self.dispatcher.register_attribute(handle, &attr, None);
        }
    }
}

impl Rebuildable for CosCache {
    fn rebuild(&self) {
        let snap = build::build_snapshot(
            self.backend.as_ref(),
            self.schema.as_ref(),
            self.config.cos_template_recursion_ceiling,
        );
        *self.snapshot.write() = Arc::new(snap);
        self.dispatcher.entry_cache().invalidate_all();
    }
}

impl VirtualAttributeProvider for CosCache {
    fn get(&self, ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, _flags: VattrFlags) -> ProviderOutcome {
        let snap = self.snapshot();
        let views_guard = self.views.read();
        query::resolve(
            &snap,
            self.dispatcher.as_ref(),
            self.backend.as_ref(),
            self.schema.as_ref(),
            views_guard.as_deref(),
            ctx,
            entry,
            &type_name.to_ascii_lowercase(),
        )
    }

    fn compare(&self, ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, candidate: &Value) -> ProviderCompareOutcome {
        match self.get(ctx, entry, type_name, VattrFlags::default()) {
            ProviderOutcome::Found(vs) if vs.contains_ci(candidate) => ProviderCompareOutcome::Equal,
            ProviderOutcome::Found(_) => ProviderCompareOutcome::NotEqual,
            ProviderOutcome::LoopDetected => ProviderCompareOutcome::LoopDetected,
            ProviderOutcome::NotFound | ProviderOutcome::NoMemory => ProviderCompareOutcome::NotFound,
        }
    }

    fn list_types(&self, entry: &dyn Entry, _flags: VattrFlags) -> Vec<String> {
        let snap = self.snapshot();
        let views_guard = self.views.read();
        let mut names = std::collections::HashSet::new();
        for rec in &snap.attr_index {
            if query::in_scope(&rec.target_tree, entry, views_guard.as_deref()) {
                names.insert(rec.attr_name.clone());
            }
        }
        names.into_iter().collect()
    }
}

/// The built-in filter recognising a COS-definition subentry, re-exported
/// for hosts wiring their own directory listeners.
pub const COS_DEFINITION_FILTER: &str = names::FILTER_COS_DEFINITIONS;

/// Adapter registering a shared `Arc<CosCache>` as a dispatcher provider.
/// The cache itself is kept as an `Arc` so the background updater
/// ([`BackgroundUpdater::spawn`]) and the dispatcher's provider chain (which
/// owns a `Box<dyn VirtualAttributeProvider>`) can both hold a reference to
/// the same live cache.
pub struct CosProvider(pub Arc<CosCache>);

impl VirtualAttributeProvider for CosProvider {
    fn get(&self, ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, flags: VattrFlags) -> ProviderOutcome {
        self.0.get(ctx, entry, type_name, flags)
    }
    fn compare(&self, ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, candidate: &Value) -> ProviderCompareOutcome {
        self.0.compare(ctx, entry, type_name, candidate)
    }
    fn list_types(&self, entry: &dyn Entry, flags: VattrFlags) -> Vec<String> {
        self.0.list_types(entry, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::host::test_support::FakeEntry;
    use crate::host::{Dn, Scope};
    use std::sync::Mutex;

    struct FakeBackend {
        contexts: Vec<Dn>,
        entries: Mutex<Vec<Arc<dyn Entry>>>,
    }

    impl Backend for FakeBackend {
        fn naming_contexts(&self) -> Vec<Dn> {
            self.contexts.clone()
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

    struct NoSchema;
    impl SchemaSource for NoSchema {
        fn schema_check_enabled(&self) -> bool {
            false
        }
        fn object_classes_for_attribute(&self, _attr_type: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn rebuild_then_get_resolves_pointer_cos_through_dispatcher() {
        let def = FakeEntry::new("cn=ptrCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosAttribute", &["mailHost"]);
        let tmpl = FakeEntry::new("cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("mailHost", &["mail.example.com"]);
        let subject = FakeEntry::new("uid=carol,ou=people,o=ex");

        let backend = Arc::new(FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(tmpl), Arc::new(subject.clone())]),
        });
        let schema = Arc::new(NoSchema);
        let dispatcher = Arc::new(Dispatcher::new(schema.clone(), VasConfig::default()));
        let cos = CosCache::new(dispatcher.clone(), backend, schema, VasConfig::default());
        cos.rebuild();

        let handle = dispatcher.register_provider(Box::new(CosProvider(cos.clone())), Some("cos".into()));
        cos.register_with_dispatcher(&handle);

        let got = dispatcher
            .values_get(None, &subject, None, "mailHost", VattrFlags::default())
            .unwrap();
        assert_eq!(got.value_sets[0].0, vec!["mail.example.com"]);
    }
}
