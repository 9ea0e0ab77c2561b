//! Roles cache (spec.md §4.3): computes the `nsRole` attribute from managed,
//! filtered, and nested role definitions, one cache per naming context, each
//! kept fresh by its own background updater.

pub mod avl;
pub mod definition;
pub mod suffix;
pub mod updater;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::VasConfig;
use crate::cos::updater::BackgroundUpdater;
use crate::diag::OnceLogger;
use crate::dispatcher::{
    Dispatcher, ProviderCompareOutcome, ProviderOutcome, VattrContext, VattrFlags, VirtualAttributeProvider,
};
use crate::host::{names, Backend, Dn, Entry, StateChangeApi, Value};

pub use definition::{RoleDefinition, RoleKind};
pub use updater::SuffixSlot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RolesError {
    #[error("role nesting ceiling reached")]
    LoopDetected,
    #[error("invalid role definition: {0}")]
    InvalidDefinition(String),
}

static NEST_DIAG: OnceLogger = OnceLogger::new();

/// The live roles cache: one rebuildable snapshot slot per naming context.
pub struct RolesCache {
    slots: RwLock<Vec<Arc<SuffixSlot>>>,
    config: VasConfig,
    updaters: RwLock<Vec<Arc<BackgroundUpdater>>>,
}

impl RolesCache {
    pub fn new(backend: Arc<dyn Backend>, dispatcher: Arc<Dispatcher>, config: VasConfig) -> Arc<Self> {
        let slots = backend
            .naming_contexts()
            .into_iter()
            .map(|nc| SuffixSlot::new(nc, backend.clone(), dispatcher.clone()))
            .collect();
        Arc::new(RolesCache {
            slots: RwLock::new(slots),
            config,
            updaters: RwLock::new(Vec::new()),
        })
    }

    /// Spawns one background updater per naming context and subscribes each
    /// to `bus`, so a write under one suffix only ever triggers that
    /// suffix's rebuild (spec.md §4.3 "Rebuild trigger").
    pub fn start(self: &Arc<Self>, bus: &dyn StateChangeApi) {
        let slots = self.slots.read().clone();
        let mut updaters = self.updaters.write();
        for slot in slots {
            let suffix_name = slot.suffix.as_str().to_string();
            let updater = Arc::new(BackgroundUpdater::spawn(slot, &format!("roles-updater-{suffix_name}")));
            updater.subscribe(bus, &format!("roles-cache::{suffix_name}"));
            updaters.push(updater);
        }
    }

    /// Forces every suffix slot to rebuild synchronously; used by tests and
    /// by hosts that want the cache warm before serving traffic.
    pub fn rebuild_all(&self) {
        for slot in self.slots.read().iter() {
            crate::cos::updater::Rebuildable::rebuild(slot.as_ref());
        }
    }

    fn suffix_for(&self, dn: &Dn) -> Option<Arc<SuffixSlot>> {
        self.slots
            .read()
            .iter()
            .filter(|s| s.suffix.is_ancestor_of(dn))
            .max_by_key(|s| s.suffix.as_str().len())
            .cloned()
    }

    fn compute_roles(&self, entry: &dyn Entry) -> Vec<Dn> {
        let Some(slot) = self.suffix_for(entry.dn()) else {
            return Vec::new();
        };
        let snapshot = slot.snapshot();
        let mut active = Vec::new();
        for idx in 0..snapshot.definitions.len() {
            let mut visiting = Vec::new();
            if role_active(
                idx,
                &snapshot.definitions,
                &snapshot.managed_index,
                entry,
                &mut visiting,
                0,
                self.config.role_nesting_ceiling,
            ) {
                active.push(snapshot.definitions[idx].dn.clone());
            }
        }
        active
    }
}

fn role_active(
    def_idx: usize,
    defs: &[RoleDefinition],
    managed_idx: &avl::ManagedRoleIndex,
    entry: &dyn Entry,
    visiting: &mut Vec<usize>,
    depth: u32,
    ceiling: u32,
) -> bool {
    let def = &defs[def_idx];
    if !def.in_scope(entry.dn()) {
        return false;
    }
    match def.kind {
        RoleKind::Managed => managed_idx.roles_for(entry.dn()).contains(&def_idx),
        RoleKind::Filtered => def.filter.as_ref().map(|f| f.matches(entry)).unwrap_or(false),
        RoleKind::Nested => {
            if depth >= ceiling || visiting.contains(&def_idx) {
                NEST_DIAG.warn_once(|| {
                    format!(
                        "nested role recursion ceiling ({ceiling}) reached or a cycle was found while evaluating {}",
                        def.dn
                    )
                });
                return false;
            }
            visiting.push(def_idx);
            let active = def.nested_role_dns.iter().any(|dn| {
                defs.iter()
                    .position(|d| d.dn.is_equal(dn))
                    .map(|idx| role_active(idx, defs, managed_idx, entry, visiting, depth + 1, ceiling))
                    .unwrap_or(false)
            });
            visiting.pop();
            active
        }
    }
}

impl VirtualAttributeProvider for RolesCache {
    fn get(&self, _ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, _flags: VattrFlags) -> ProviderOutcome {
        if !type_name.eq_ignore_ascii_case(names::NS_ROLE_ATTR) {
            return ProviderOutcome::NotFound;
        }
        let roles = self.compute_roles(entry);
        if roles.is_empty() {
            ProviderOutcome::NotFound
        } else {
            ProviderOutcome::Found(roles.into_iter().map(|d| d.as_str().to_string()).collect())
        }
    }

    fn compare(&self, ctx: &mut VattrContext, entry: &dyn Entry, type_name: &str, candidate: &Value) -> ProviderCompareOutcome {
        match self.get(ctx, entry, type_name, VattrFlags::default()) {
            ProviderOutcome::Found(vs) => {
                let candidate_dn = Dn::new(candidate.clone());
                if vs.iter().any(|v| Dn::new(v.clone()).is_equal(&candidate_dn)) {
                    ProviderCompareOutcome::Equal
                } else {
                    ProviderCompareOutcome::NotEqual
                }
            }
            ProviderOutcome::NotFound => ProviderCompareOutcome::NotFound,
            ProviderOutcome::LoopDetected => ProviderCompareOutcome::LoopDetected,
            ProviderOutcome::NoMemory => ProviderCompareOutcome::NotFound,
        }
    }

    fn list_types(&self, entry: &dyn Entry, _flags: VattrFlags) -> Vec<String> {
        if self.compute_roles(entry).is_empty() {
            Vec::new()
        } else {
            vec![names::NS_ROLE_ATTR.to_ascii_lowercase()]
        }
    }
}
