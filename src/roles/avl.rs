//! Ordered index from an entry DN to the managed roles it directly claims
//! (spec.md §4.3 "Managed" — the original implementation keeps this as an
//! AVL tree; a `BTreeMap` gives the same ordered-lookup behaviour using the
//! standard library's own balanced tree).

use std::collections::BTreeMap;

use crate::host::Dn;

#[derive(Default)]
pub struct ManagedRoleIndex {
    by_entry_dn: BTreeMap<Dn, Vec<usize>>,
}

impl ManagedRoleIndex {
    pub fn new() -> Self {
        ManagedRoleIndex {
            by_entry_dn: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, entry_dn: Dn, role_def_index: usize) {
        self.by_entry_dn.entry(entry_dn).or_default().push(role_def_index);
    }

    /// Definition indices of every managed role `entry_dn` directly claims.
    pub fn roles_for(&self, entry_dn: &Dn) -> &[usize] {
        self.by_entry_dn.get(entry_dn).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_entry_dn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entry_dn.is_empty()
    }
}
