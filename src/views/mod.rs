//! Views search rewriter (spec.md §4.5): virtual container nodes that
//! redirect searches to their real backing location with an added
//! membership filter, and the `ViewsApi` membership tests COS's target-tree
//! scoping can fall back to.

pub mod node;
pub mod rewrite;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::cos::updater::Rebuildable;
use crate::host::{Backend, Dn, Entry, RewriteOutcome, Scope, ViewsApi};

pub use node::{build_view_tree, ViewNode, ViewTree};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewsError {
    #[error("view node has no usable membership filter")]
    UnusableFilter,
}

/// The live view tree plus the backend needed to resolve entries for
/// membership tests and to find a view's real naming context.
pub struct ViewsEngine {
    backend: Arc<dyn Backend>,
    tree: RwLock<ViewTree>,
}

impl ViewsEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(ViewsEngine {
            backend,
            tree: RwLock::new(ViewTree::default()),
        })
    }

    pub fn rewrite(&self, base: &Dn, scope: Scope, filter: &crate::filter::Filter) -> RewriteOutcome {
        rewrite::rewrite_search(&self.tree.read(), self.backend.as_ref(), base, scope, filter)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}

impl Rebuildable for ViewsEngine {
    fn rebuild(&self) {
        let tree = build_view_tree(self.backend.as_ref());
        *self.tree.write() = tree;
    }
}

impl ViewsApi for ViewsEngine {
    fn entry_exists(&self, view_dn: &Dn, entry: &dyn Entry) -> bool {
        self.tree
            .read()
            .include_ancestor_filters(view_dn)
            .map(|f| f.matches(entry))
            .unwrap_or(false)
    }

    fn entry_dn_exists(&self, view_dn: &Dn, entry_dn: &Dn) -> bool {
        match self.backend.get_entry(entry_dn) {
            Some(entry) => self.entry_exists(view_dn, entry.as_ref()),
            None => false,
        }
    }
}
