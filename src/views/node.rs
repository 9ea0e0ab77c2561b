//! The in-memory view tree (spec.md §4.5 "Views"): a hierarchy of virtual
//! container nodes, each carrying a membership filter, mounted somewhere in
//! the directory without corresponding to a real storage location.

use once_cell::sync::Lazy;

use crate::filter::Filter;
use crate::host::{names, Backend, Dn, Entry, Scope};

static VIEW_DEFINITIONS_FILTER: Lazy<Filter> =
    Lazy::new(|| Filter::parse(names::FILTER_VIEW_DEFINITIONS).expect("built-in filter parses"));

#[derive(Debug, Clone)]
pub struct ViewNode {
    pub dn: Dn,
    pub parent: Option<Dn>,
    pub filter: Option<Filter>,
}

#[derive(Default)]
pub struct ViewTree {
    nodes: Vec<ViewNode>,
}

impl ViewTree {
    pub fn find(&self, dn: &Dn) -> Option<&ViewNode> {
        self.nodes.iter().find(|n| n.dn.is_equal(dn))
    }

    /// The nearest view node that is `dn` itself or an ancestor of it.
    pub fn nearest_containing(&self, dn: &Dn) -> Option<&ViewNode> {
        self.nodes
            .iter()
            .filter(|n| n.dn.is_ancestor_of(dn))
            .max_by_key(|n| n.dn.as_str().len())
    }

    /// Every ancestor view filter AND-ed with `dn`'s own, innermost to
    /// outermost, plus `!(objectclass=nsView)` to keep view subentries
    /// themselves out of the plain membership arm (spec.md §4.5
    /// `include_ancestor_filters`).
    pub fn include_ancestor_filters(&self, dn: &Dn) -> Option<Filter> {
        let mut parts = Vec::new();
        let mut current = self.find(dn)?;
        loop {
            if let Some(f) = &current.filter {
                parts.push(f.clone());
            }
            match &current.parent {
                Some(parent_dn) => match self.find(parent_dn) {
                    Some(p) => current = p,
                    None => break,
                },
                None => break,
            }
        }
        if parts.is_empty() {
            return None;
        }
        parts.push(Filter::Not(Box::new(Filter::Equal {
            attr: "objectclass".to_string(),
            value: "nsView".to_string(),
        })));
        Some(Filter::And(parts))
    }

    /// Every node whose ancestor chain passes through `dn` (not including
    /// `dn` itself).
    fn descendants_of(&self, dn: &Dn) -> Vec<&ViewNode> {
        self.nodes
            .iter()
            .filter(|n| !n.dn.is_equal(dn) && dn.is_ancestor_of(&n.dn))
            .collect()
    }

    /// `NOT(OR(descendant view filters))`, `None` when `dn` has no
    /// descendant views or none of them carry a filter (spec.md §4.5
    /// `exclude_child_filters`): keeps an entry that also satisfies a more
    /// specific nested view out of this view's one-level results, so it's
    /// only ever surfaced under that nested view.
    pub fn exclude_child_filters(&self, dn: &Dn) -> Option<Filter> {
        let descendant_filters: Vec<Filter> = self
            .descendants_of(dn)
            .into_iter()
            .filter_map(|n| n.filter.clone())
            .collect();
        if descendant_filters.is_empty() {
            None
        } else {
            Some(Filter::Not(Box::new(Filter::Or(descendant_filters))))
        }
    }

    /// `(parentdn=<dn>)`: restricts a one-level search to entries physically
    /// stored directly under this view's node (spec.md §4.5
    /// `exclude_grand_child_views`).
    pub fn exclude_grand_child_views(&self, dn: &Dn) -> Filter {
        Filter::Equal {
            attr: "parentdn".to_string(),
            value: dn.as_str().to_string(),
        }
    }

    /// `(entrydn=<dn>) OR (parentdn=<dn>) OR (parentdn=<descendant>)...`:
    /// surfaces the view's own subentry and anything stored directly under
    /// it or any of its descendant views during a subtree search (spec.md
    /// §4.5 `include_child_views`).
    pub fn include_child_views(&self, dn: &Dn) -> Filter {
        let mut parts = vec![
            Filter::Equal {
                attr: "entrydn".to_string(),
                value: dn.as_str().to_string(),
            },
            self.exclude_grand_child_views(dn),
        ];
        for descendant in self.descendants_of(dn) {
            parts.push(Filter::Equal {
                attr: "parentdn".to_string(),
                value: descendant.dn.as_str().to_string(),
            });
        }
        Filter::Or(parts)
    }

    /// The real location this view hierarchy is mounted at: the DN parent
    /// of the topmost view in `dn`'s ancestor chain (spec.md §4.5 "search
    /// base"), since a view's members live scattered under that real
    /// subtree rather than literally one level below the view itself.
    pub fn search_base(&self, dn: &Dn) -> Option<Dn> {
        let mut current = self.find(dn)?;
        loop {
            match &current.parent {
                Some(parent_dn) => match self.find(parent_dn) {
                    Some(p) => current = p,
                    None => return Some(parent_dn.clone()),
                },
                None => return None,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Rebuilds the whole view tree from the backend (spec.md §4.5 build step).
pub fn build_view_tree(backend: &dyn Backend) -> ViewTree {
    let mut nodes = Vec::new();
    for nc in backend.naming_contexts() {
        for entry in backend.search(&nc, Scope::Subtree, &VIEW_DEFINITIONS_FILTER) {
            nodes.push(parse_view_node(entry.as_ref()));
        }
    }
    ViewTree { nodes }
}

fn parse_view_node(entry: &dyn Entry) -> ViewNode {
    let view_filter = entry
        .get_attribute(names::VIEW_FILTER_ATTR)
        .and_then(|vs| vs.iter().next().cloned())
        .and_then(|raw| Filter::parse(&raw).ok());
    ViewNode {
        dn: entry.dn().clone(),
        parent: entry.dn().parent(),
        filter: view_filter,
    }
}
