//! Per-suffix background rebuild worker (spec.md §4.3 "Rebuild trigger").
//!
//! Role membership is scoped to a naming context, so each suffix gets its
//! own [`BackgroundUpdater`](crate::cos::updater::BackgroundUpdater) rather
//! than sharing one thread across the whole directory — a write under one
//! suffix should never stall a rebuild for an unrelated one.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cos::updater::Rebuildable;
use crate::dispatcher::Dispatcher;
use crate::host::{Backend, Dn};
use crate::roles::suffix::{build_suffix_snapshot, RoleSuffixSnapshot, RoleSuffixSnapshotInner};

/// One naming context's rebuildable slot: the swappable snapshot plus
/// enough collaborators to rebuild it.
pub struct SuffixSlot {
    pub suffix: Dn,
    snapshot: RwLock<RoleSuffixSnapshot>,
    backend: Arc<dyn Backend>,
    dispatcher: Arc<Dispatcher>,
}

impl SuffixSlot {
    pub fn new(suffix: Dn, backend: Arc<dyn Backend>, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(SuffixSlot {
            snapshot: RwLock::new(Arc::new(RoleSuffixSnapshotInner::empty(suffix.clone()))),
            suffix,
            backend,
            dispatcher,
        })
    }

    pub fn snapshot(&self) -> RoleSuffixSnapshot {
        self.snapshot.read().clone()
    }
}

impl Rebuildable for SuffixSlot {
    fn rebuild(&self) {
        let snap = build_suffix_snapshot(self.backend.as_ref(), &self.suffix);
        *self.snapshot.write() = Arc::new(snap);
        self.dispatcher.entry_cache().invalidate_all();
    }
}
