//! Background rebuild worker (spec.md §4.2 "Rebuild trigger").
//!
//! Rebuilding a snapshot means re-searching the whole directory for COS
//! definitions and templates, which is too expensive to do inline on the
//! write path that triggered it. Instead the notify-bus callback just flags
//! the cache dirty and wakes a dedicated OS thread to do the rebuild.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::host::StateChangeApi;

/// Anything that can rebuild itself from scratch. Implemented by
/// [`crate::cos::CosCache`], [`crate::roles::SuffixSlot`], and
/// [`crate::views::ViewsEngine`] so all three share this one
/// background-worker plumbing.
pub trait Rebuildable: Send + Sync {
    fn rebuild(&self);
}

struct DirtyFlag {
    dirty: Mutex<bool>,
    cvar: Condvar,
}

/// Owns the background thread that rebuilds a [`Rebuildable`] cache whenever
/// it is marked dirty. Dropping the updater stops the thread and joins it.
pub struct BackgroundUpdater {
    flag: Arc<DirtyFlag>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundUpdater {
    /// Spawns the worker thread and performs one initial rebuild (the cache
    /// starts empty until the first build completes).
    pub fn spawn(cache: Arc<dyn Rebuildable>, thread_name: &str) -> Self {
        let flag = Arc::new(DirtyFlag {
            dirty: Mutex::new(true),
            cvar: Condvar::new(),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag2 = flag.clone();
        let shutdown2 = shutdown.clone();
        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run(cache, flag2, shutdown2))
            .expect("spawning the cache updater thread");

        BackgroundUpdater {
            flag,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn mark_dirty(&self) {
        *self.flag.dirty.lock().unwrap() = true;
        self.flag.cvar.notify_one();
    }

    /// Subscribes this updater to `bus`, marking itself dirty on every
    /// event the bus delivers (spec.md §4.2/§4.3 "touching a definition or
    /// template under the cached index triggers a rebuild").
    pub fn subscribe(self: &Arc<Self>, bus: &dyn StateChangeApi, caller_id: &str) {
        let weak = Arc::downgrade(self);
        bus.register(
            caller_id,
            None,
            None,
            Box::new(move |_event| {
                if let Some(updater) = weak.upgrade() {
                    updater.mark_dirty();
                }
            }),
        );
    }
}

fn run(cache: Arc<dyn Rebuildable>, flag: Arc<DirtyFlag>, shutdown: Arc<AtomicBool>) {
    loop {
        let mut guard = flag.dirty.lock().unwrap();
        while !*guard && !shutdown.load(Ordering::SeqCst) {
            guard = flag.cvar.wait(guard).unwrap();
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        *guard = false;
        drop(guard);
        cache.rebuild();
    }
}

impl Drop for BackgroundUpdater {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.flag.cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
