//! The VAS dispatcher (spec.md §4.1): routes virtual-attribute lookups to
//! the provider chain registered for a base attribute type, merges the
//! result with an entry's stored attributes, and memoises cacheable answers
//! per entry.

pub mod context;
pub mod entry_cache;
pub mod provider;
pub mod typemap;

use std::sync::Arc;

use thiserror::Error;

use crate::config::VasConfig;
use crate::host::{Dn, Entry, SchemaSource, Value, ValueSet};

pub use context::VattrContext;
pub use entry_cache::EntryVattrCache;
pub use provider::{ProviderCompareOutcome, ProviderHandle, ProviderOutcome, VirtualAttributeProvider};
pub use typemap::TypeMap;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("attribute not known to any provider and not present on the entry")]
    NotFound,
    #[error("vattr recursion ceiling reached")]
    LoopDetected,
    #[error("allocation failure")]
    NoMemory,
    #[error("REAL_ATTRS_ONLY and VIRTUAL_ATTRS_ONLY are mutually exclusive")]
    InvalidFlags,
}

pub type DispatcherResult<T> = Result<T, DispatcherError>;

/// Flags accepted by `values_get`/`list_types` (spec.md §4.1 point 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VattrFlags {
    pub real_attrs_only: bool,
    pub virtual_attrs_only: bool,
    pub request_pointers: bool,
    pub suppress_subtypes: bool,
    pub list_operational_attrs: bool,
}

impl VattrFlags {
    fn validate(self) -> DispatcherResult<()> {
        if self.real_attrs_only && self.virtual_attrs_only {
            return Err(DispatcherError::InvalidFlags);
        }
        Ok(())
    }
}

/// Whether a returned attribute name exactly matched the requested type (or
/// is an explicit alias of it) or is a subtype of it (spec.md §4.1 point 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDisposition {
    ExactOrAlias,
    Subtype,
}

/// Ownership marker retained for host-API fidelity; in this crate values are
/// always owned copies, so `is_copy` is always true, but the field lets a
/// real host track which results alias its own storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub is_copy: bool,
}

#[derive(Debug, Clone)]
pub struct ValuesGetOutcome {
    pub value_sets: Vec<ValueSet>,
    pub actual_type_names: Vec<String>,
    pub match_dispositions: Vec<MatchDisposition>,
    pub buffer_flags: BufferFlags,
}

impl ValuesGetOutcome {
    pub fn count(&self) -> usize {
        self.value_sets.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    Equal,
    NotEqual,
}

/// One entry in a `list_types` result (spec.md §4.1 point 5).
#[derive(Debug, Clone)]
pub struct TypeThang {
    pub name: String,
    /// `Some` when the stored value is still available for direct use;
    /// cleared (`None`) when a provider claims the type, signalling that the
    /// provider must be consulted on retrieval.
    pub stored_value: Option<ValueSet>,
}

fn is_cacheable(type_name: &str, cfg: &VasConfig) -> bool {
    if cfg.cache_none {
        return type_name.eq_ignore_ascii_case(crate::host::names::NS_ROLE_ATTR);
    }
    cfg.cache_all || type_name.eq_ignore_ascii_case(crate::host::names::NS_ROLE_ATTR)
}

/// The process-wide dispatcher instance.
pub struct Dispatcher {
    type_map: TypeMap,
    entry_cache: EntryVattrCache,
    schema: Arc<dyn SchemaSource>,
    config: VasConfig,
}

impl Dispatcher {
    pub fn new(schema: Arc<dyn SchemaSource>, config: VasConfig) -> Self {
        Dispatcher {
            type_map: TypeMap::new(),
            entry_cache: EntryVattrCache::new(),
            schema,
            config,
        }
    }

    pub fn register_provider(
        &self,
        provider: Box<dyn VirtualAttributeProvider>,
        hint: Option<String>,
    ) -> ProviderHandle {
        ProviderHandle::new(provider, hint)
    }

    pub fn register_attribute(&self, handle: &ProviderHandle, type_name: &str, namespace_dn: Option<&Dn>) {
        self.type_map.register_attribute(handle, type_name, namespace_dn);
        for oc in self.schema.object_classes_for_attribute(type_name) {
            self.type_map.bind_schema(type_name, &oc);
        }
    }

    /// Called when the schema collaborator signals `cn=schema` changed
    /// (spec.md §4.1 "Schema check").
    pub fn schema_changed(&self) {
        self.type_map.clear_schema_bindings();
        self.entry_cache.invalidate_all();
    }

    pub fn entry_cache(&self) -> &EntryVattrCache {
        &self.entry_cache
    }

    fn schema_valid(&self, entry: &dyn Entry, type_name: &str) -> bool {
        if !self.schema.schema_check_enabled() {
            return true;
        }
        let classes = self.type_map.object_classes_for(type_name);
        if classes.is_empty() {
            // No binding recorded means no schema constraint was ever
            // registered for this type; treat it as unconstrained.
            return true;
        }
        classes.iter().any(|oc| entry.has_object_class(oc))
    }

    /// spec.md §4.1 point 3.
    pub fn values_get(
        &self,
        ctx: Option<&mut VattrContext>,
        entry: &dyn Entry,
        namespace_dn: Option<&Dn>,
        type_name: &str,
        flags: VattrFlags,
    ) -> DispatcherResult<ValuesGetOutcome> {
        flags.validate()?;
        let mut owned_ctx;
        let ctx = match ctx {
            Some(c) => c,
            None => {
                owned_ctx = VattrContext::new(self.config.dispatch_recursion_ceiling);
                &mut owned_ctx
            }
        };
        let _guard = ctx.enter()?;

        let type_lower = type_name.to_ascii_lowercase();

        // (i) per-entry cache
        if !flags.real_attrs_only {
            if let Some(cached) = self.entry_cache.get(entry.id(), &type_lower) {
                return match cached {
                    Some(values) => Ok(ValuesGetOutcome {
                        value_sets: vec![values],
                        actual_type_names: vec![type_lower.clone()],
                        match_dispositions: vec![MatchDisposition::ExactOrAlias],
                        buffer_flags: BufferFlags { is_copy: true },
                    }),
                    None => Err(DispatcherError::NotFound),
                };
            }
        }

        // (ii) provider chain
        let mut provider_value = None;
        if !flags.real_attrs_only {
            let chain = self.type_map.chain_for(&type_lower, namespace_dn);
            for handle in &chain {
                match handle.provider().get(ctx, entry, &type_lower, flags) {
                    ProviderOutcome::Found(values) => {
                        provider_value = Some(values);
                        break;
                    }
                    ProviderOutcome::LoopDetected => return Err(DispatcherError::LoopDetected),
                    ProviderOutcome::NoMemory => return Err(DispatcherError::NoMemory),
                    ProviderOutcome::NotFound => continue,
                }
            }
            if provider_value.is_some() && !self.schema_valid(entry, &type_lower) {
                provider_value = None;
            }
        }

        let outcome = if let Some(values) = provider_value {
            Some((
                vec![values],
                vec![type_lower.clone()],
                vec![MatchDisposition::ExactOrAlias],
            ))
        } else if !flags.virtual_attrs_only {
            // (iii) fall back to stored attribute(s)
            let stored = if flags.suppress_subtypes {
                entry
                    .get_attribute(&type_lower)
                    .map(|vs| vec![(type_lower.clone(), vs)])
                    .unwrap_or_default()
            } else {
                entry.get_attribute_with_subtypes(&type_lower)
            };
            if stored.is_empty() {
                None
            } else {
                let mut value_sets = Vec::new();
                let mut actual_type_names = Vec::new();
                let mut dispositions = Vec::new();
                for (name, values) in stored {
                    let disposition = if name.eq_ignore_ascii_case(&type_lower) {
                        MatchDisposition::ExactOrAlias
                    } else {
                        MatchDisposition::Subtype
                    };
                    value_sets.push(values);
                    actual_type_names.push(name);
                    dispositions.push(disposition);
                }
                Some((value_sets, actual_type_names, dispositions))
            }
        } else {
            None
        };

        // (iv) merge into per-entry cache, even the absent outcome. Only the
        // exact-type answer is memoised; subtype-only fallbacks don't speak
        // to whether the base type itself is present, so they're left
        // uncached.
        if !flags.real_attrs_only && is_cacheable(&type_lower, &self.config) {
            match &outcome {
                None => self.entry_cache.put(entry.id(), &type_lower, None),
                Some((vs, names, _)) => {
                    if let Some(i) = names.iter().position(|n| n.eq_ignore_ascii_case(&type_lower)) {
                        self.entry_cache.put(entry.id(), &type_lower, Some(vs[i].clone()));
                    }
                }
            }
        }

        match outcome {
            Some((value_sets, actual_type_names, match_dispositions)) => Ok(ValuesGetOutcome {
                value_sets,
                actual_type_names,
                match_dispositions,
                buffer_flags: BufferFlags { is_copy: true },
            }),
            None => Err(DispatcherError::NotFound),
        }
    }

    /// spec.md §4.1 point 4.
    pub fn values_compare(
        &self,
        ctx: Option<&mut VattrContext>,
        entry: &dyn Entry,
        namespace_dn: Option<&Dn>,
        type_name: &str,
        candidate: &Value,
    ) -> DispatcherResult<CompareOutcome> {
        let mut owned_ctx;
        let ctx = match ctx {
            Some(c) => c,
            None => {
                owned_ctx = VattrContext::new(self.config.dispatch_recursion_ceiling);
                &mut owned_ctx
            }
        };
        let _guard = ctx.enter()?;

        let type_lower = type_name.to_ascii_lowercase();
        let chain = self.type_map.chain_for(&type_lower, namespace_dn);
        for handle in &chain {
            match handle.provider().compare(ctx, entry, &type_lower, candidate) {
                ProviderCompareOutcome::Equal => return Ok(CompareOutcome::Equal),
                ProviderCompareOutcome::NotEqual => return Ok(CompareOutcome::NotEqual),
                ProviderCompareOutcome::LoopDetected => return Err(DispatcherError::LoopDetected),
                ProviderCompareOutcome::NotFound => continue,
            }
        }

        // Fall through to the stored value set.
        match entry.get_attribute(&type_lower) {
            Some(values) if values.contains_ci(candidate) => Ok(CompareOutcome::Equal),
            Some(_) => Ok(CompareOutcome::NotEqual),
            None => Err(DispatcherError::NotFound),
        }
    }

    /// spec.md §4.1 point 5.
    pub fn list_types(&self, entry: &dyn Entry, flags: VattrFlags) -> Vec<TypeThang> {
        let mut by_name: Vec<TypeThang> = entry
            .stored_attribute_names()
            .into_iter()
            .map(|name| {
                let stored_value = entry.get_attribute(&name);
                TypeThang { name, stored_value }
            })
            .collect();

        // Providers contribute their types; adding a type already present
        // clears its stored value pointer so retrieval must consult the
        // provider (spec.md §4.1 point 5).
        for handle in self.all_providers_for_entry(entry) {
            for type_name in handle.provider().list_types(entry, flags) {
                let lower = type_name.to_ascii_lowercase();
                if let Some(existing) = by_name.iter_mut().find(|t| t.name.eq_ignore_ascii_case(&lower)) {
                    existing.stored_value = None;
                } else {
                    by_name.push(TypeThang {
                        name: lower,
                        stored_value: None,
                    });
                }
            }
        }
        by_name
    }

    fn all_providers_for_entry(&self, _entry: &dyn Entry) -> Vec<ProviderHandle> {
        // A provider contributes to list_types regardless of which specific
        // attribute name it owns; in practice COS/Roles each register once
        // per provided type, so we gather the union of every distinct
        // handle across all bindings.
        self.type_map.all_handles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::FakeEntry;
    use std::sync::Arc;

    struct NoSchema;
    impl SchemaSource for NoSchema {
        fn schema_check_enabled(&self) -> bool {
            false
        }
        fn object_classes_for_attribute(&self, _attr_type: &str) -> Vec<String> {
            Vec::new()
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(NoSchema), VasConfig::default())
    }

    struct AlwaysFound(&'static str);
    impl VirtualAttributeProvider for AlwaysFound {
        fn get(&self, _c: &mut VattrContext, _e: &dyn Entry, _t: &str, _f: VattrFlags) -> ProviderOutcome {
            ProviderOutcome::Found(ValueSet::single(self.0))
        }
        fn compare(&self, _c: &mut VattrContext, _e: &dyn Entry, _t: &str, v: &Value) -> ProviderCompareOutcome {
            if v == self.0 {
                ProviderCompareOutcome::Equal
            } else {
                ProviderCompareOutcome::NotEqual
            }
        }
        fn list_types(&self, _e: &dyn Entry, _f: VattrFlags) -> Vec<String> {
            vec!["postalcode".into()]
        }
    }

    #[test]
    fn fallthrough_to_stored_attribute_when_no_provider_claims_type() {
        let d = dispatcher();
        let e = FakeEntry::new("uid=alice,o=ex").with_attr("cn", &["Alice"]);
        let got = d
            .values_get(None, &e, None, "cn", VattrFlags::default())
            .unwrap();
        assert_eq!(got.value_sets[0], ValueSet::single("Alice"));
    }

    #[test]
    fn virtual_only_returns_not_found_when_no_provider_claims_type() {
        let d = dispatcher();
        let e = FakeEntry::new("uid=alice,o=ex").with_attr("cn", &["Alice"]);
        let flags = VattrFlags {
            virtual_attrs_only: true,
            ..Default::default()
        };
        let err = d.values_get(None, &e, None, "cn", flags).unwrap_err();
        assert_eq!(err, DispatcherError::NotFound);
    }

    #[test]
    fn mutually_exclusive_flags_are_rejected() {
        let d = dispatcher();
        let e = FakeEntry::new("uid=alice,o=ex");
        let flags = VattrFlags {
            real_attrs_only: true,
            virtual_attrs_only: true,
            ..Default::default()
        };
        assert_eq!(
            d.values_get(None, &e, None, "cn", flags).unwrap_err(),
            DispatcherError::InvalidFlags
        );
    }

    #[test]
    fn provider_result_wins_over_stored_attribute() {
        let d = dispatcher();
        let handle = d.register_provider(Box::new(AlwaysFound("94110")), None);
        d.register_attribute(&handle, "postalCode", None);
        let e = FakeEntry::new("uid=bob,o=ex").with_attr("postalcode", &["00000"]);
        let got = d
            .values_get(None, &e, None, "postalCode", VattrFlags::default())
            .unwrap();
        assert_eq!(got.value_sets[0], ValueSet::single("94110"));
    }

    #[test]
    fn per_entry_cache_is_reused_then_invalidated_on_rebuild() {
        let d = dispatcher();
        let handle = d.register_provider(Box::new(AlwaysFound("94110")), None);
        d.register_attribute(&handle, "postalCode", None);
        let e = FakeEntry::new("uid=bob,o=ex");

        let first = d
            .values_get(None, &e, None, "postalCode", VattrFlags::default())
            .unwrap();
        assert_eq!(first.value_sets[0], ValueSet::single("94110"));
        assert_eq!(
            d.entry_cache().get(e.id(), "postalcode"),
            Some(Some(ValueSet::single("94110")))
        );

        d.entry_cache().invalidate_all();
        assert_eq!(d.entry_cache().get(e.id(), "postalcode"), None);
    }

    #[test]
    fn mutual_recursion_is_detected_within_ceiling() {
        struct Recurser;
        impl VirtualAttributeProvider for Recurser {
            fn get(&self, ctx: &mut VattrContext, _e: &dyn Entry, _t: &str, _f: VattrFlags) -> ProviderOutcome {
                match ctx.enter() {
                    Ok(_guard) => ProviderOutcome::NotFound,
                    Err(_) => ProviderOutcome::LoopDetected,
                }
            }
            fn compare(&self, _c: &mut VattrContext, _e: &dyn Entry, _t: &str, _v: &Value) -> ProviderCompareOutcome {
                ProviderCompareOutcome::NotFound
            }
            fn list_types(&self, _e: &dyn Entry, _f: VattrFlags) -> Vec<String> {
                Vec::new()
            }
        }

        let config = VasConfig {
            dispatch_recursion_ceiling: 3,
            ..Default::default()
        };
        let d = Dispatcher::new(Arc::new(NoSchema), config);
        let handle = d.register_provider(Box::new(Recurser), None);
        d.register_attribute(&handle, "loopy", None);
        let e = FakeEntry::new("uid=x,o=ex");
        let mut ctx = VattrContext::new(3);
        // Drive the context to the ceiling directly, then ask the dispatcher
        // to enter once more: it must refuse instead of overrunning it.
        let _g1 = ctx.enter().unwrap();
        let _g2 = ctx.enter().unwrap();
        let _g3 = ctx.enter().unwrap();
        let err = d
            .values_get(Some(&mut ctx), &e, None, "loopy", VattrFlags::default())
            .unwrap_err();
        assert_eq!(err, DispatcherError::LoopDetected);
    }

    #[test]
    fn list_types_clears_stored_pointer_when_provider_claims_it() {
        let d = dispatcher();
        let handle = d.register_provider(Box::new(AlwaysFound("94110")), None);
        d.register_attribute(&handle, "postalCode", None);
        let e = FakeEntry::new("uid=bob,o=ex").with_attr("postalcode", &["00000"]);
        let types = d.list_types(&e, VattrFlags::default());
        let pc = types.iter().find(|t| t.name == "postalcode").unwrap();
        assert!(pc.stored_value.is_none());
    }
}
