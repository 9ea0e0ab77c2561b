//! Builds a COS snapshot from the backend (spec.md §4.2 build pipeline).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::cos::definition::{parse_cos_attribute_value, CosDefinition, CosScheme, CosTemplate};
use crate::cos::snapshot::{prune_to_ancestor_free_set, AttrIndexEntry, CosSnapshotInner};
use crate::diag::OnceLogger;
use crate::filter::Filter;
use crate::host::{names, Backend, Dn, Entry, Scope, SchemaSource};

static BUILD_DIAG: OnceLogger = OnceLogger::new();

static COS_DEFINITIONS_FILTER: Lazy<Filter> =
    Lazy::new(|| Filter::parse(names::FILTER_COS_DEFINITIONS).expect("built-in filter parses"));
static COS_TEMPLATES_FILTER: Lazy<Filter> =
    Lazy::new(|| Filter::parse(names::FILTER_COS_TEMPLATES).expect("built-in filter parses"));

/// Rebuilds the whole COS snapshot from scratch by walking every naming
/// context for `cosDefinition`/`cosSuperDefinition` subentries (spec.md §4.2
/// build steps 1-5).
pub fn build_snapshot(backend: &dyn Backend, _schema: &dyn SchemaSource, recursion_ceiling: u32) -> CosSnapshotInner {
    let mut definitions = Vec::new();
    let mut all_template_dns = Vec::new();
    let definition_limit = (recursion_ceiling as usize).saturating_mul(64);

    'contexts: for nc in backend.naming_contexts() {
        for def_entry in backend.search(&nc, Scope::Subtree, &COS_DEFINITIONS_FILTER) {
            if definitions.len() >= definition_limit {
                BUILD_DIAG.warn_once(|| {
                    format!(
                        "more than {definition_limit} COS definitions found under the directory; stopping build early"
                    )
                });
                break 'contexts;
            }
            if let Some(def) = parse_definition(def_entry.as_ref(), backend, &COS_TEMPLATES_FILTER) {
                all_template_dns.extend(def.template_dns.iter().cloned());
                definitions.push(def);
            }
        }
    }

    definitions.retain(|def| {
        if def.is_self_serving() {
            log::warn!(
                "COS definition {} is self-serving (specifier is among its own provided attributes); ignoring it",
                def.dn
            );
            false
        } else if def.scheme == CosScheme::Classic && def.templates.is_empty() {
            log::warn!("classic COS definition {} has no templates; ignoring it", def.dn);
            false
        } else {
            true
        }
    });

    let mut attr_index = Vec::new();
    for (def_index, def) in definitions.iter().enumerate() {
        for (attr_name, _markers) in &def.provided_attrs {
            for target_tree in &def.target_trees {
                attr_index.push(AttrIndexEntry {
                    attr_name: attr_name.to_ascii_lowercase(),
                    target_tree: target_tree.clone(),
                    priority: def.priority,
                    def_index,
                });
            }
        }
    }
    attr_index.sort_by(|a, b| {
        a.attr_name
            .cmp(&b.attr_name)
            .then_with(|| a.target_tree.cmp(&b.target_tree))
            .then_with(|| a.priority.unwrap_or(u32::MAX).cmp(&b.priority.unwrap_or(u32::MAX)))
    });

    let template_dn_index = prune_to_ancestor_free_set(all_template_dns);

    CosSnapshotInner::new(definitions, attr_index, template_dn_index)
}

fn parse_definition(entry: &dyn Entry, backend: &dyn Backend, tmpl_filter: &Filter) -> Option<CosDefinition> {
    let classes = entry.object_classes();
    let has = |oc: &str| classes.iter().any(|c| c.eq_ignore_ascii_case(oc));

    let scheme = if has("cosClassicDefinition") {
        CosScheme::Classic
    } else if has("cosPointerDefinition") {
        CosScheme::Pointer
    } else if has("cosIndirectDefinition") {
        CosScheme::Indirect
    } else {
        // A bare cosSuperDefinition/cosDefinition subentry without one of the
        // three concrete schemes carries no queryable behaviour.
        return None;
    };

    let explicit_target_trees = entry
        .get_attribute(names::COS_TARGET_TREE)
        .map(|vs| vs.iter().map(|v| Dn::new(v.clone())).collect::<Vec<_>>())
        .filter(|v| !v.is_empty());
    let explicit_template_dns = entry
        .get_attribute(names::COS_TEMPLATE_DN)
        .map(|vs| vs.iter().map(|v| Dn::new(v.clone())).collect::<Vec<_>>())
        .filter(|v| !v.is_empty());

    // cos_cache.c: an absent cosTargetTree defaults to the definition's own
    // parent; cosTemplateDn defaults to that same parent too, but only when
    // it is absent alongside cosTargetTree.
    let (target_trees, template_dns): (Vec<Dn>, Vec<Dn>) = match (explicit_target_trees, explicit_template_dns) {
        (Some(tt), Some(td)) => (tt, td),
        (Some(tt), None) => (tt, Vec::new()),
        (None, Some(td)) => (entry.dn().parent().into_iter().collect(), td),
        (None, None) => {
            let parent: Vec<Dn> = entry.dn().parent().into_iter().collect();
            (parent.clone(), parent)
        }
    };

    let specifier = match scheme {
        CosScheme::Classic => entry
            .get_attribute(names::COS_SPECIFIER)
            .and_then(|vs| vs.iter().next().cloned()),
        CosScheme::Indirect => entry
            .get_attribute(names::COS_INDIRECT_SPECIFIER)
            .and_then(|vs| vs.iter().next().cloned()),
        CosScheme::Pointer => None,
    };

    let priority = entry
        .get_attribute(names::COS_PRIORITY)
        .and_then(|vs| vs.iter().next().and_then(|v| v.parse::<u32>().ok()));

    let provided_attrs: Vec<(String, _)> = entry
        .get_attribute(names::COS_ATTRIBUTE)
        .map(|vs| vs.iter().map(|v| parse_cos_attribute_value(v)).collect())
        .unwrap_or_default();

    let mut templates = Vec::new();
    if !matches!(scheme, CosScheme::Indirect) {
        for template_dn in &template_dns {
            for tmpl_entry in backend.search(template_dn, Scope::OneLevel, tmpl_filter) {
                templates.push(build_template(tmpl_entry.as_ref(), &provided_attrs, specifier.as_deref()));
            }
        }
    }

    Some(CosDefinition {
        dn: entry.dn().clone(),
        scheme,
        target_trees,
        template_dns,
        specifier,
        priority,
        provided_attrs,
        templates,
    })
}

fn build_template(
    entry: &dyn Entry,
    provided_attrs: &[(String, crate::cos::definition::AttributeMarkers)],
    specifier: Option<&str>,
) -> CosTemplate {
    let grade_raw = entry.dn().first_rdn_value();
    // A template is the default one when its grade is "<specifier>-default",
    // not the literal grade "default" (cos_cache.c's cos_cache_add_tmpl).
    let is_default = match (&grade_raw, specifier) {
        (Some(grade), Some(specifier)) => grade.eq_ignore_ascii_case(&format!("{specifier}-default")),
        _ => false,
    };
    let grade = if is_default { None } else { grade_raw };

    let mut attrs = HashMap::new();
    for (name, _) in provided_attrs {
        if let Some(values) = entry.get_attribute(name) {
            attrs.insert(name.to_ascii_lowercase(), values);
        }
    }

    CosTemplate {
        dn: entry.dn().clone(),
        grade,
        is_default,
        attrs,
    }
}
