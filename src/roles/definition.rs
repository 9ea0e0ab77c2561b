//! Role definitions (spec.md §3 "Role definition", §4.3 "Managed",
//! "Filtered", "Nested").

use crate::filter::Filter;
use crate::host::Dn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Managed,
    Filtered,
    Nested,
}

#[derive(Debug, Clone)]
pub struct RoleDefinition {
    pub dn: Dn,
    pub kind: RoleKind,
    /// `nsRoleFilter`, present only on filtered roles.
    pub filter: Option<Filter>,
    /// `nsRoleDN` values naming the roles a nested role unions together.
    pub nested_role_dns: Vec<Dn>,
    /// `nsRoleScopeDN`: subtrees the role is allowed to apply within. An
    /// empty vector means unscoped (applies anywhere the role is otherwise
    /// satisfied).
    pub scope_dns: Vec<Dn>,
}

impl RoleDefinition {
    pub fn in_scope(&self, entry_dn: &Dn) -> bool {
        self.scope_dns.is_empty() || self.scope_dns.iter().any(|s| s.is_ancestor_of(entry_dn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscoped_role_applies_everywhere() {
        let role = RoleDefinition {
            dn: Dn::new("cn=eng,o=ex"),
            kind: RoleKind::Managed,
            filter: None,
            nested_role_dns: vec![],
            scope_dns: vec![],
        };
        assert!(role.in_scope(&Dn::new("uid=alice,ou=people,o=ex")));
    }

    #[test]
    fn scoped_role_rejects_entries_outside_its_subtree() {
        let role = RoleDefinition {
            dn: Dn::new("cn=eng,o=ex"),
            kind: RoleKind::Managed,
            filter: None,
            nested_role_dns: vec![],
            scope_dns: vec![Dn::new("ou=people,o=ex")],
        };
        assert!(role.in_scope(&Dn::new("uid=alice,ou=people,o=ex")));
        assert!(!role.in_scope(&Dn::new("cn=svc,ou=services,o=ex")));
    }
}
