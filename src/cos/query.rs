//! Resolves one `(entry, attribute)` lookup against a COS snapshot
//! (spec.md §4.2 "Classic", "Pointer", "Indirect", "Schema enforcement").

use crate::cos::definition::CosScheme;
use crate::cos::snapshot::CosSnapshotInner;
use crate::dispatcher::{Dispatcher, ProviderOutcome, VattrContext, VattrFlags};
use crate::host::{Backend, Dn, Entry, SchemaSource, ValueSet, ViewsApi};

/// Whether `def`'s target tree covers `entry`, either directly or (when a
/// Views collaborator is wired in) through view membership (spec.md §4.5
/// integration note).
pub(crate) fn in_scope(target_tree: &Dn, entry: &dyn Entry, views: Option<&dyn ViewsApi>) -> bool {
    if target_tree.is_ancestor_of(entry.dn()) {
        return true;
    }
    views.map(|v| v.entry_exists(target_tree, entry)).unwrap_or(false)
}

fn schema_allows(schema: &dyn SchemaSource, entry: &dyn Entry, type_lower: &str) -> bool {
    if !schema.schema_check_enabled() {
        return true;
    }
    let classes = schema.object_classes_for_attribute(type_lower);
    classes.is_empty() || classes.iter().any(|oc| entry.has_object_class(oc))
}

#[allow(clippy::too_many_arguments)]
pub fn resolve(
    snapshot: &CosSnapshotInner,
    dispatcher: &Dispatcher,
    backend: &dyn Backend,
    schema: &dyn SchemaSource,
    views: Option<&dyn ViewsApi>,
    ctx: &mut VattrContext,
    entry: &dyn Entry,
    type_lower: &str,
) -> ProviderOutcome {
    let entries = snapshot.attr_entries(type_lower);
    if entries.is_empty() {
        return ProviderOutcome::NotFound;
    }

    let stored_already_present = entry
        .get_attribute(type_lower)
        .map(|vs| !vs.is_empty())
        .unwrap_or(false);

    let mut result: Option<(ValueSet, bool)> = None;
    let mut default_fallback: Option<(ValueSet, bool)> = None;
    let mut merge_mode = false;
    let mut merged_values: Vec<String> = Vec::new();

    for rec in entries {
        let def = &snapshot.definitions[rec.def_index];
        let markers = match def.provided_attrs.iter().find(|(n, _)| n.eq_ignore_ascii_case(type_lower)) {
            Some((_, m)) => *m,
            None => continue,
        };

        if stored_already_present && !markers.override_ && !markers.is_operational() {
            continue;
        }
        if merge_mode && !markers.merge {
            continue;
        }
        if !in_scope(&rec.target_tree, entry, views) {
            continue;
        }

        let values = match def.scheme {
            CosScheme::Pointer => def
                .templates
                .first()
                .and_then(|t| t.attrs.get(type_lower))
                .map(|v| (v.clone(), false)),
            CosScheme::Classic => {
                let specifier = match &def.specifier {
                    Some(s) => s,
                    None => continue,
                };
                let matched_template = match dispatcher.values_get(Some(ctx), entry, None, specifier, VattrFlags::default()) {
                    Ok(outcome) => outcome
                        .value_sets
                        .first()
                        .and_then(|vs| vs.iter().find_map(|v| def.find_template_by_grade(v))),
                    Err(crate::dispatcher::DispatcherError::LoopDetected) => return ProviderOutcome::LoopDetected,
                    Err(_) => None,
                };
                match matched_template {
                    Some(t) => t.attrs.get(type_lower).map(|v| (v.clone(), false)),
                    None => def
                        .default_template()
                        .and_then(|t| t.attrs.get(type_lower))
                        .map(|v| (v.clone(), true)),
                }
            }
            CosScheme::Indirect => {
                let specifier = match &def.specifier {
                    Some(s) => s,
                    None => continue,
                };
                let target_dn = match dispatcher.values_get(Some(ctx), entry, None, specifier, VattrFlags::default()) {
                    Ok(outcome) => outcome.value_sets.first().and_then(|vs| vs.iter().next()).map(|dn| Dn::new(dn.clone())),
                    Err(crate::dispatcher::DispatcherError::LoopDetected) => return ProviderOutcome::LoopDetected,
                    Err(_) => None,
                };
                match target_dn.and_then(|dn| backend.get_entry(&dn)) {
                    Some(target_entry) => {
                        match dispatcher.values_get(Some(ctx), target_entry.as_ref(), None, type_lower, VattrFlags::default()) {
                            Ok(outcome) => outcome.value_sets.into_iter().next().map(|v| (v, false)),
                            Err(crate::dispatcher::DispatcherError::LoopDetected) => return ProviderOutcome::LoopDetected,
                            Err(_) => None,
                        }
                    }
                    None => None,
                }
            }
        };

        if let Some((values, is_default_hit)) = values {
            if is_default_hit {
                if default_fallback.is_none() {
                    default_fallback = Some((values, markers.is_operational()));
                }
                continue;
            }
            if markers.merge {
                merged_values.extend(values.iter().cloned());
                merge_mode = true;
                continue;
            }
            result = Some((values, markers.is_operational()));
            break;
        }
    }

    if merge_mode && !merged_values.is_empty() {
        result = Some((merged_values.into_iter().collect(), false));
    }

    let (values, is_operational) = match result.or(default_fallback) {
        Some(v) => v,
        None => return ProviderOutcome::NotFound,
    };

    if !is_operational && !schema_allows(schema, entry, type_lower) {
        return ProviderOutcome::NotFound;
    }

    ProviderOutcome::Found(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VasConfig;
    use crate::cos::build::build_snapshot;
    use crate::host::test_support::FakeEntry;
    use std::sync::{Arc, Mutex};

    struct FakeBackend {
        contexts: Vec<Dn>,
        entries: Mutex<Vec<Arc<dyn Entry>>>,
    }

    impl Backend for FakeBackend {
        fn naming_contexts(&self) -> Vec<Dn> {
            self.contexts.clone()
        }
        fn search(&self, base: &Dn, scope: crate::host::Scope, filter: &crate::filter::Filter) -> Vec<Arc<dyn Entry>> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| match scope {
                    crate::host::Scope::Base => e.dn().is_equal(base),
                    crate::host::Scope::OneLevel => e.dn().parent().map(|p| p.is_equal(base)).unwrap_or(false),
                    crate::host::Scope::Subtree => base.is_ancestor_of(e.dn()),
                })
                .filter(|e| filter.matches(e.as_ref()))
                .cloned()
                .collect()
        }
        fn get_entry(&self, dn: &Dn) -> Option<Arc<dyn Entry>> {
            self.entries.lock().unwrap().iter().find(|e| e.dn().is_equal(dn)).cloned()
        }
    }

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

    #[test]
    fn classic_cos_picks_matching_grade_template() {
        let def = FakeEntry::new("cn=classicCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosClassicDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosSpecifier", &["employeeType"])
            .with_attr("cosAttribute", &["postalCode"]);
        let gold = FakeEntry::new("cn=eng,cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("postalCode", &["94110"]);
        let default_tmpl = FakeEntry::new("cn=employeeType-default,cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("postalCode", &["00000"]);
        let subject = FakeEntry::new("uid=alice,ou=people,o=ex").with_attr("employeeType", &["eng"]);

        let backend = FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(gold), Arc::new(default_tmpl)]),
        };
        let snap = build_snapshot(&backend, &NoSchema, 30);
        let d = dispatcher();
        let mut ctx = VattrContext::new(50);
        let outcome = resolve(&snap, &d, &backend, &NoSchema, None, &mut ctx, &subject, "postalcode");
        match outcome {
            ProviderOutcome::Found(vs) => assert_eq!(vs.0, vec!["94110"]),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn classic_cos_falls_back_to_default_template_when_no_grade_matches() {
        let def = FakeEntry::new("cn=classicCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosClassicDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosSpecifier", &["employeeType"])
            .with_attr("cosAttribute", &["postalCode"]);
        let gold = FakeEntry::new("cn=eng,cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("postalCode", &["94110"]);
        let default_tmpl = FakeEntry::new("cn=employeeType-default,cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("postalCode", &["00000"]);
        let subject = FakeEntry::new("uid=bob,ou=people,o=ex").with_attr("employeeType", &["unknown-grade"]);

        let backend = FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(gold), Arc::new(default_tmpl)]),
        };
        let snap = build_snapshot(&backend, &NoSchema, 30);
        let d = dispatcher();
        let mut ctx = VattrContext::new(50);
        let outcome = resolve(&snap, &d, &backend, &NoSchema, None, &mut ctx, &subject, "postalcode");
        match outcome {
            ProviderOutcome::Found(vs) => assert_eq!(vs.0, vec!["00000"]),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn pointer_cos_ignores_specifier_entirely() {
        let def = FakeEntry::new("cn=ptrCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosAttribute", &["mailHost"]);
        let tmpl = FakeEntry::new("cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("mailHost", &["mail.example.com"]);
        let subject = FakeEntry::new("uid=carol,ou=people,o=ex");

        let backend = FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(tmpl)]),
        };
        let snap = build_snapshot(&backend, &NoSchema, 30);
        let d = dispatcher();
        let mut ctx = VattrContext::new(50);
        let outcome = resolve(&snap, &d, &backend, &NoSchema, None, &mut ctx, &subject, "mailhost");
        assert!(matches!(outcome, ProviderOutcome::Found(vs) if vs.0 == vec!["mail.example.com"]));
    }

    #[test]
    fn stored_attribute_blocks_cos_unless_override() {
        let def = FakeEntry::new("cn=ptrCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosAttribute", &["mailHost override"]);
        let tmpl = FakeEntry::new("cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("mailHost", &["mail.example.com"]);
        let subject = FakeEntry::new("uid=carol,ou=people,o=ex").with_attr("mailHost", &["own.example.com"]);

        let backend = FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(tmpl)]),
        };
        let snap = build_snapshot(&backend, &NoSchema, 30);
        let d = dispatcher();
        let mut ctx = VattrContext::new(50);
        let outcome = resolve(&snap, &d, &backend, &NoSchema, None, &mut ctx, &subject, "mailhost");
        assert!(matches!(outcome, ProviderOutcome::Found(vs) if vs.0 == vec!["mail.example.com"]));
    }

    #[test]
    fn out_of_scope_entry_is_not_found() {
        let def = FakeEntry::new("cn=ptrCos,o=ex")
            .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
            .with_attr("cosTargetTree", &["ou=people,o=ex"])
            .with_attr("cosTemplateDn", &["cn=tmpl,o=ex"])
            .with_attr("cosAttribute", &["mailHost"]);
        let tmpl = FakeEntry::new("cn=tmpl,o=ex")
            .with_object_classes(&["costemplate"])
            .with_attr("mailHost", &["mail.example.com"]);
        let subject = FakeEntry::new("uid=carol,ou=groups,o=ex");

        let backend = FakeBackend {
            contexts: vec![Dn::new("o=ex")],
            entries: Mutex::new(vec![Arc::new(def), Arc::new(tmpl)]),
        };
        let snap = build_snapshot(&backend, &NoSchema, 30);
        let d = dispatcher();
        let mut ctx = VattrContext::new(50);
        let outcome = resolve(&snap, &d, &backend, &NoSchema, None, &mut ctx, &subject, "mailhost");
        assert!(matches!(outcome, ProviderOutcome::NotFound));
    }
}
