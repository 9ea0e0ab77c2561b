//! Sticky-flag diagnostics: spec.md §7 requires exactly one log line per
//! logical failure (loop detection, recursion ceiling, malformed
//! definitions), with repeats of the same failure suppressed.

use std::sync::atomic::{AtomicBool, Ordering};

/// Fires a `log::warn!` the first time it is tripped, and silently no-ops on
/// every subsequent trip until [`OnceLogger::reset`] is called.
#[derive(Debug, Default)]
pub struct OnceLogger {
    fired: AtomicBool,
}

impl OnceLogger {
    pub const fn new() -> Self {
        OnceLogger {
            fired: AtomicBool::new(false),
        }
    }

    /// Logs `msg` at `warn` level iff this is the first call since creation
    /// or the last [`reset`](Self::reset). Returns whether it actually logged.
    pub fn warn_once(&self, msg: impl FnOnce() -> String) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::warn!("{}", msg());
            true
        } else {
            false
        }
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
