//! Rewrites a search landing at or under a view node into a search against
//! the real backing location (spec.md §4.5 "Search rewriter").

use crate::filter::Filter;
use crate::host::{Backend, Dn, RewriteOutcome, Scope};
use crate::views::node::ViewTree;

/// `tree` is searched for the nearest view node containing `base`. A base
/// scope request landing strictly under a view (not on the view node
/// itself) has no real entry to answer with, so it's refused with
/// `OperationsError`; `OneLevel`/`Subtree` requests are rewritten against
/// the view's real search base, always as a subtree search against the
/// backend, with the original scope preserved only in which filter arms are
/// composed in (spec.md §4.5 steps 2-3).
pub fn rewrite_search(tree: &ViewTree, _backend: &dyn Backend, base: &Dn, scope: Scope, filter: &Filter) -> RewriteOutcome {
    let Some(node) = tree.nearest_containing(base) else {
        return RewriteOutcome::KeepLooking;
    };

    let Some(include_ancestor_filters) = tree.include_ancestor_filters(&node.dn) else {
        // A view node with an unparsable or absent nsViewFilter, and no
        // filtered ancestor either, can't be evaluated at all.
        return RewriteOutcome::Refuse;
    };

    if scope == Scope::Base {
        // The view node itself is a real, stored subentry; a base-scope
        // lookup of exactly that DN is answered normally. Strictly below
        // it there is nothing real to find.
        return if node.dn.is_equal(base) {
            RewriteOutcome::KeepLooking
        } else {
            RewriteOutcome::OperationsError
        };
    }

    let Some(real_base) = tree.search_base(&node.dn) else {
        return RewriteOutcome::OperationsError;
    };

    let mut own_arm = vec![filter.clone(), include_ancestor_filters];
    let see_views_arm = if scope == Scope::OneLevel {
        if let Some(exclude_child_filters) = tree.exclude_child_filters(&node.dn) {
            own_arm.push(exclude_child_filters);
        }
        tree.exclude_grand_child_views(&node.dn)
    } else {
        tree.include_child_views(&node.dn)
    };

    let combined = Filter::Or(vec![Filter::And(own_arm), Filter::And(vec![filter.clone(), see_views_arm])]);
    RewriteOutcome::RewroteOk {
        base: real_base,
        scope: Scope::Subtree,
        filter: combined,
    }
}
