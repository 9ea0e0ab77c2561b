//! Provider handles: the shared, reference-counted registration record for
//! one registered virtual-attribute provider (spec.md §3 "Provider handle",
//! §4.1 point 1).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatcher::context::VattrContext;
use crate::dispatcher::VattrFlags;
use crate::host::{Entry, Value, ValueSet};

/// Outcome of a single provider `get`/`get_batch` call.
#[derive(Debug, Clone)]
pub enum ProviderOutcome {
    Found(ValueSet),
    NotFound,
    LoopDetected,
    NoMemory,
}

/// Outcome of a provider `compare` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCompareOutcome {
    Equal,
    NotEqual,
    NotFound,
    LoopDetected,
}

/// A registered virtual-attribute provider. Implemented by COS, by Roles,
/// and by test doubles.
pub trait VirtualAttributeProvider: Send + Sync {
    fn get(
        &self,
        ctx: &mut VattrContext,
        entry: &dyn Entry,
        type_name: &str,
        flags: VattrFlags,
    ) -> ProviderOutcome;

    /// Default batch implementation calls `get` once per type; providers
    /// that can answer several types from one internal lookup (as COS does
    /// when several attributes come from the same template) may override
    /// this.
    fn get_batch(
        &self,
        ctx: &mut VattrContext,
        entry: &dyn Entry,
        type_names: &[String],
        flags: VattrFlags,
    ) -> Vec<ProviderOutcome> {
        type_names
            .iter()
            .map(|t| self.get(ctx, entry, t, flags))
            .collect()
    }

    fn compare(
        &self,
        ctx: &mut VattrContext,
        entry: &dyn Entry,
        type_name: &str,
        candidate: &Value,
    ) -> ProviderCompareOutcome;

    /// Contributes this provider's attribute type names for `entry` to the
    /// `list_types` result (spec.md §4.1 point 5).
    fn list_types(&self, entry: &dyn Entry, flags: VattrFlags) -> Vec<String>;
}

struct ProviderInner {
    provider: Box<dyn VirtualAttributeProvider>,
    hint: Option<String>,
    on_zero: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    zero_fired: AtomicBool,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        if let Some(cb) = self.on_zero.lock().unwrap().take() {
            if !self.zero_fired.swap(true, Ordering::SeqCst) {
                cb();
            }
        }
    }
}

/// A shared reference to a registered provider. Cloning increments the
/// refcount (spec.md §3 invariant: "Provider refcounts are never negative");
/// the on-zero callback installed via [`ProviderHandle::make_reference_counted`]
/// fires exactly once, when the last clone drops.
#[derive(Clone)]
pub struct ProviderHandle(Arc<ProviderInner>);

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("strong_count", &Arc::strong_count(&self.0))
            .field("hint", &self.0.hint)
            .finish()
    }
}

impl ProviderHandle {
    pub fn new(provider: Box<dyn VirtualAttributeProvider>, hint: Option<String>) -> Self {
        ProviderHandle(Arc::new(ProviderInner {
            provider,
            hint,
            on_zero: Mutex::new(None),
            zero_fired: AtomicBool::new(false),
        }))
    }

    /// Installs the destructor invoked exactly once when the refcount
    /// reaches zero (spec.md §4.1 point 1: `make_reference_counted`).
    pub fn make_reference_counted(&self, on_zero_cb: impl FnOnce() + Send + 'static) {
        *self.0.on_zero.lock().unwrap() = Some(Box::new(on_zero_cb));
    }

    pub fn hint(&self) -> Option<&str> {
        self.0.hint.as_deref()
    }

    pub fn provider(&self) -> &dyn VirtualAttributeProvider {
        self.0.provider.as_ref()
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &ProviderHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
