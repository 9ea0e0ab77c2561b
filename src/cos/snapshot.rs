//! The immutable, atomically-swapped COS snapshot (spec.md §3 "COS cache
//! snapshot", §4.2 "Snapshot atomicity").

use std::sync::Arc;

use crate::cos::definition::CosDefinition;
use crate::host::Dn;

/// One entry in the flattened `(attribute, target tree, priority)` index
/// used to answer a lookup without scanning every definition (spec.md §4.2
/// build step 4).
#[derive(Debug, Clone)]
pub struct AttrIndexEntry {
    pub attr_name: String,
    pub target_tree: Dn,
    pub priority: Option<u32>,
    pub def_index: usize,
}

/// The data a COS cache rebuild produces, swapped in as one unit so readers
/// never observe a half-built cache (spec.md §8 property 3).
pub struct CosSnapshotInner {
    pub definitions: Vec<CosDefinition>,
    pub attr_index: Vec<AttrIndexEntry>,
    /// Sorted, ancestor-pruned template DNs: no entry here is an ancestor of
    /// (or equal to) another, so membership is a single scan rather than a
    /// pointer-chasing tree walk (spec.md §4.2 build step 5).
    pub template_dn_index: Vec<Dn>,
    /// Test/diagnostic hook fired exactly once when the last `Arc` clone of
    /// this snapshot is dropped, mirroring the on-zero idiom used by
    /// provider handles.
    drop_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Drop for CosSnapshotInner {
    fn drop(&mut self) {
        if let Some(hook) = &self.drop_hook {
            hook();
        }
    }
}

impl CosSnapshotInner {
    pub fn empty() -> Self {
        CosSnapshotInner {
            definitions: Vec::new(),
            attr_index: Vec::new(),
            template_dn_index: Vec::new(),
            drop_hook: None,
        }
    }

    pub fn new(
        definitions: Vec<CosDefinition>,
        attr_index: Vec<AttrIndexEntry>,
        template_dn_index: Vec<Dn>,
    ) -> Self {
        CosSnapshotInner {
            definitions,
            attr_index,
            template_dn_index,
            drop_hook: None,
        }
    }

    pub fn with_drop_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.drop_hook = Some(Box::new(hook));
        self
    }

    /// True if `dn` falls under (or equals) some cached template location.
    pub fn dn_under_some_cached_template(&self, dn: &Dn) -> bool {
        self.template_dn_index.iter().any(|t| t.is_ancestor_of(dn))
    }

    pub fn attr_entries(&self, type_lower: &str) -> &[AttrIndexEntry] {
        let start = self.attr_index.partition_point(|e| e.attr_name.as_str() < type_lower);
        let end = start
            + self.attr_index[start..]
                .iter()
                .take_while(|e| e.attr_name == type_lower)
                .count();
        &self.attr_index[start..end]
    }
}

pub type CosSnapshot = Arc<CosSnapshotInner>;

/// Collapses `dns` to the minimal ancestor-free set: sorted so ancestors are
/// considered before their descendants, then any candidate already covered
/// by a kept entry is dropped (spec.md §4.2 build step 5).
pub fn prune_to_ancestor_free_set(mut dns: Vec<Dn>) -> Vec<Dn> {
    dns.sort_by(|a, b| {
        let depth_a = a.as_str().matches(',').count();
        let depth_b = b.as_str().matches(',').count();
        depth_a.cmp(&depth_b).then_with(|| a.cmp(b))
    });
    let mut kept: Vec<Dn> = Vec::new();
    for dn in dns {
        if !kept.iter().any(|k: &Dn| k.is_ancestor_of(&dn)) {
            kept.push(dn);
        }
    }
    kept
}
