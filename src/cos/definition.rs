//! COS definitions and templates (spec.md §3 "COS definition", "COS
//! template").

use std::collections::HashMap;

use crate::host::names;
use crate::host::{Dn, ValueSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosScheme {
    Classic,
    Pointer,
    Indirect,
}

/// The per-value qualifiers a `cosAttribute` value may carry (spec.md §4.2
/// build step 1, §6 "COS qualifiers").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeMarkers {
    pub operational: bool,
    pub merge: bool,
    pub override_: bool,
    pub default: bool,
    pub operational_default: bool,
}

impl AttributeMarkers {
    pub fn is_operational(&self) -> bool {
        self.operational || self.operational_default
    }
}

/// Strips the trailing qualifier tokens from a raw `cosAttribute` value
/// (e.g. `"postalCode default"`), returning the bare attribute name and the
/// accumulated markers. Qualifiers may be combined (e.g. `"x operational
/// merge-schemes"`).
pub fn parse_cos_attribute_value(raw: &str) -> (String, AttributeMarkers) {
    const QUALIFIERS: &[(&str, fn(&mut AttributeMarkers))] = &[
        (names::COS_QUALIFIER_OPERATIONAL_DEFAULT, |m| m.operational_default = true),
        (names::COS_QUALIFIER_OPERATIONAL, |m| m.operational = true),
        (names::COS_QUALIFIER_MERGE, |m| m.merge = true),
        (names::COS_QUALIFIER_OVERRIDE, |m| m.override_ = true),
        (names::COS_QUALIFIER_DEFAULT, |m| m.default = true),
    ];

    let mut remaining = raw.to_string();
    let mut markers = AttributeMarkers::default();
    loop {
        let mut stripped_any = false;
        for (suffix, apply) in QUALIFIERS {
            if let Some(stripped) = remaining.strip_suffix(suffix) {
                apply(&mut markers);
                remaining = stripped.to_string();
                stripped_any = true;
                break;
            }
        }
        if !stripped_any {
            break;
        }
    }
    (remaining.trim().to_string(), markers)
}

#[derive(Debug, Clone)]
pub struct CosTemplate {
    pub dn: Dn,
    pub grade: Option<String>,
    pub is_default: bool,
    pub attrs: HashMap<String, ValueSet>,
}

#[derive(Debug, Clone)]
pub struct CosDefinition {
    pub dn: Dn,
    pub scheme: CosScheme,
    pub target_trees: Vec<Dn>,
    pub template_dns: Vec<Dn>,
    /// `cosSpecifier` for Classic, `cosIndirectSpecifier` for Indirect;
    /// unused for Pointer.
    pub specifier: Option<String>,
    /// `cosPriority`, lower sorts first; `None` sorts last (spec.md §3).
    pub priority: Option<u32>,
    pub provided_attrs: Vec<(String, AttributeMarkers)>,
    pub templates: Vec<CosTemplate>,
}

impl CosDefinition {
    /// spec.md §4.2 build step 3: a definition is self-serving (rejected)
    /// if its specifier attribute is among the attributes it provides.
    pub fn is_self_serving(&self) -> bool {
        match &self.specifier {
            Some(spec) => self
                .provided_attrs
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(spec)),
            None => false,
        }
    }

    pub fn find_template_by_grade(&self, grade: &str) -> Option<&CosTemplate> {
        self.templates
            .iter()
            .find(|t| t.grade.as_deref().map(|g| g.eq_ignore_ascii_case(grade)).unwrap_or(false))
    }

    pub fn default_template(&self) -> Option<&CosTemplate> {
        self.templates.iter().find(|t| t.is_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_qualifier() {
        let (name, markers) = parse_cos_attribute_value("postalCode default");
        assert_eq!(name, "postalCode");
        assert!(markers.default);
        assert!(!markers.override_);
    }

    #[test]
    fn strips_stacked_qualifiers() {
        let (name, markers) = parse_cos_attribute_value("departmentNumber operational merge-schemes");
        assert_eq!(name, "departmentNumber");
        assert!(markers.operational);
        assert!(markers.merge);
    }

    #[test]
    fn plain_attribute_has_no_markers() {
        let (name, markers) = parse_cos_attribute_value("telephoneNumber");
        assert_eq!(name, "telephoneNumber");
        assert_eq!(markers, AttributeMarkers::default());
    }

    #[test]
    fn self_serving_definition_is_rejected() {
        let def = CosDefinition {
            dn: Dn::new("cn=cos,o=ex"),
            scheme: CosScheme::Classic,
            target_trees: vec![],
            template_dns: vec![],
            specifier: Some("employeeType".into()),
            priority: None,
            provided_attrs: vec![("employeeType".into(), AttributeMarkers::default())],
            templates: vec![],
        };
        assert!(def.is_self_serving());
    }
}
