//! One naming context's role cache: every role definition found under it
//! plus the reverse index of which entries directly claim a managed role
//! (spec.md §4.3 build pipeline). Rebuilt and swapped as a unit, the same
//! atomicity discipline as the COS snapshot (spec.md §8 property 3).

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::diag::OnceLogger;
use crate::filter::Filter;
use crate::host::{names, Backend, Dn, Scope};
use crate::roles::avl::ManagedRoleIndex;
use crate::roles::definition::{RoleDefinition, RoleKind};
use crate::roles::RolesError;

static ROLE_DEFINITIONS_FILTER: Lazy<Filter> =
    Lazy::new(|| Filter::parse(names::FILTER_ROLE_DEFINITIONS).expect("built-in filter parses"));
static ROLE_CLAIM_FILTER: Lazy<Filter> =
    Lazy::new(|| Filter::parse(&format!("({}=*)", names::ROLE_DN_ATTR)).expect("built-in filter parses"));
static ROLE_FILTER_DIAG: OnceLogger = OnceLogger::new();

/// Rejects an `nsRoleFilter` that would loop back through `nsRole` (directly
/// or nested) or that conflates a role with a COS template, the two checks
/// `roles_check_filter` and its surrounding `costemplate` guard make in the
/// original roles cache.
fn filter_is_valid(filter: &Filter, role_dn: &Dn, backend: &dyn Backend) -> bool {
    if filter.references_attr(names::NS_ROLE_ATTR) {
        return false;
    }
    let Some(parent) = role_dn.parent() else {
        return true;
    };
    let costmpl_filter = Filter::And(vec![
        Filter::Equal {
            attr: "objectclass".to_string(),
            value: names::COS_TEMPLATE_OC.to_string(),
        },
        filter.clone(),
    ]);
    backend.search(&parent, Scope::Subtree, &costmpl_filter).is_empty()
}

pub struct RoleSuffixSnapshotInner {
    pub suffix: Dn,
    pub definitions: Vec<RoleDefinition>,
    pub managed_index: ManagedRoleIndex,
}

impl RoleSuffixSnapshotInner {
    pub fn empty(suffix: Dn) -> Self {
        RoleSuffixSnapshotInner {
            suffix,
            definitions: Vec::new(),
            managed_index: ManagedRoleIndex::new(),
        }
    }

    pub fn find(&self, dn: &Dn) -> Option<&RoleDefinition> {
        self.definitions.iter().find(|d| d.dn.is_equal(dn))
    }
}

pub type RoleSuffixSnapshot = Arc<RoleSuffixSnapshotInner>;

/// Rebuilds one suffix's role snapshot from scratch (spec.md §4.3 build
/// steps: find definitions, classify by scheme, index managed membership).
pub fn build_suffix_snapshot(backend: &dyn Backend, suffix: &Dn) -> RoleSuffixSnapshotInner {
    let mut definitions = Vec::new();

    for entry in backend.search(suffix, Scope::Subtree, &ROLE_DEFINITIONS_FILTER) {
        let classes = entry.object_classes();
        let has = |oc: &str| classes.iter().any(|c| c.eq_ignore_ascii_case(oc));

        let kind = if has("nsFilteredRoleDefinition") {
            RoleKind::Filtered
        } else if has("nsNestedRoleDefinition") {
            RoleKind::Nested
        } else if has("nsManagedRoleDefinition") || has("nsSimpleRoleDefinition") {
            RoleKind::Managed
        } else {
            continue;
        };

        let raw_filter = entry
            .get_attribute(names::ROLE_FILTER_ATTR)
            .and_then(|vs| vs.iter().next().cloned());
        let filter = match (kind, raw_filter) {
            (RoleKind::Filtered, Some(raw)) => match Filter::parse(&raw).ok() {
                Some(f) if filter_is_valid(&f, entry.dn(), backend) => Some(f),
                Some(_) => {
                    let err = RolesError::InvalidDefinition(format!(
                        "role {}: nsRoleFilter \"{raw}\" references {} or matches a cosTemplate",
                        entry.dn(),
                        names::NS_ROLE_ATTR
                    ));
                    ROLE_FILTER_DIAG.warn_once(|| err.to_string());
                    continue;
                }
                None => None,
            },
            (_, raw) => raw.and_then(|raw| Filter::parse(&raw).ok()),
        };

        let nested_role_dns = entry
            .get_attribute(names::ROLE_DN_ATTR)
            .map(|vs| vs.iter().map(|v| Dn::new(v.clone())).collect())
            .unwrap_or_default();

        let scope_dns = entry
            .get_attribute(names::ROLE_SCOPE_DN_ATTR)
            .map(|vs| vs.iter().map(|v| Dn::new(v.clone())).collect())
            .unwrap_or_default();

        definitions.push(RoleDefinition {
            dn: entry.dn().clone(),
            kind,
            filter,
            nested_role_dns,
            scope_dns,
        });
    }

    let mut managed_index = ManagedRoleIndex::new();
    for member in backend.search(suffix, Scope::Subtree, &ROLE_CLAIM_FILTER) {
        let Some(claimed_values) = member.get_attribute(names::ROLE_DN_ATTR) else {
            continue;
        };
        for claimed in claimed_values.iter() {
            let claimed_dn = Dn::new(claimed.clone());
            if let Some(idx) = definitions
                .iter()
                .position(|d| matches!(d.kind, RoleKind::Managed) && d.dn.is_equal(&claimed_dn))
            {
                managed_index.record(member.dn().clone(), idx);
            }
        }
    }

    RoleSuffixSnapshotInner {
        suffix: suffix.clone(),
        definitions,
        managed_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::FakeEntry;
    use crate::host::Entry;
    use std::sync::Mutex;

    struct FakeBackend {
        entries: Mutex<Vec<Arc<dyn Entry>>>,
    }

    impl Backend for FakeBackend {
        fn naming_contexts(&self) -> Vec<Dn> {
            vec![Dn::new("o=ex")]
        }
        fn search(&self, base: &Dn, scope: Scope, filter: &Filter) -> Vec<Arc<dyn Entry>> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| match scope {
                    Scope::Base => e.dn().is_equal(base),
                    Scope::OneLevel => e.dn().parent().map(|p| p.is_equal(base)).unwrap_or(false),
                    Scope::Subtree => base.is_ancestor_of(e.dn()),
                })
                .filter(|e| filter.matches(e.as_ref()))
                .cloned()
                .collect()
        }
        fn get_entry(&self, dn: &Dn) -> Option<Arc<dyn Entry>> {
            self.entries.lock().unwrap().iter().find(|e| e.dn().is_equal(dn)).cloned()
        }
    }

    #[test]
    fn build_classifies_roles_and_indexes_managed_membership() {
        let managed = FakeEntry::new("cn=eng,o=ex").with_object_classes(&["nsRoleDefinition", "nsManagedRoleDefinition", "ldapsubentry"]);
        let filtered = FakeEntry::new("cn=allStaff,o=ex")
            .with_object_classes(&["nsRoleDefinition", "nsFilteredRoleDefinition", "ldapsubentry"])
            .with_attr("nsRoleFilter", &["(objectclass=inetOrgPerson)"]);
        let nested = FakeEntry::new("cn=allEng,o=ex")
            .with_object_classes(&["nsRoleDefinition", "nsNestedRoleDefinition", "ldapsubentry"])
            .with_attr("nsRoleDN", &["cn=eng,o=ex"]);
        let alice = FakeEntry::new("uid=alice,ou=people,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);

        let backend = FakeBackend {
            entries: Mutex::new(vec![
                Arc::new(managed),
                Arc::new(filtered),
                Arc::new(nested),
                Arc::new(alice),
            ]),
        };

        let snap = build_suffix_snapshot(&backend, &Dn::new("o=ex"));
        assert_eq!(snap.definitions.len(), 3);
        let eng_idx = snap
            .definitions
            .iter()
            .position(|d| d.dn.is_equal(&Dn::new("cn=eng,o=ex")))
            .unwrap();
        assert_eq!(snap.managed_index.roles_for(&Dn::new("uid=alice,ou=people,o=ex")), &[eng_idx]);
    }

    #[test]
    fn filtered_role_referencing_nsrole_is_refused() {
        let looping = FakeEntry::new("cn=loop,o=ex")
            .with_object_classes(&["nsRoleDefinition", "nsFilteredRoleDefinition", "ldapsubentry"])
            .with_attr("nsRoleFilter", &["(nsRole=*)"]);

        let backend = FakeBackend {
            entries: Mutex::new(vec![Arc::new(looping)]),
        };

        let snap = build_suffix_snapshot(&backend, &Dn::new("o=ex"));
        assert!(snap.definitions.is_empty());
    }

    #[test]
    fn filtered_role_matching_a_costemplate_is_refused() {
        let filtered = FakeEntry::new("cn=allStaff,o=ex")
            .with_object_classes(&["nsRoleDefinition", "nsFilteredRoleDefinition", "ldapsubentry"])
            .with_attr("nsRoleFilter", &["(objectclass=inetOrgPerson)"]);
        let conflated_template = FakeEntry::new("cn=tmpl,o=ex")
            .with_object_classes(&["costemplate", "inetOrgPerson"]);

        let backend = FakeBackend {
            entries: Mutex::new(vec![Arc::new(filtered), Arc::new(conflated_template)]),
        };

        let snap = build_suffix_snapshot(&backend, &Dn::new("o=ex"));
        assert!(snap.definitions.is_empty());
    }
}
