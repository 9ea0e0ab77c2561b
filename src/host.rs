//! Narrow interfaces to the host directory server.
//!
//! Everything in this module stands in for machinery spec.md places out of
//! scope: the wire protocol, the storage backend, the schema registry, and
//! access-control evaluation. The subsystem only ever reaches those through
//! the traits below, so a host can plug in its real entry store, schema
//! cache, and ACL engine without this crate knowing anything about them.

use std::fmt;
use std::sync::Arc;

use crate::filter::Filter;

/// A distinguished name, normalized for case-insensitive comparison.
///
/// Normalization lowercases the ASCII range and collapses whitespace around
/// `,` and `=` separators. It does *not* perform full RFC 4514 unescaping —
/// see `SPEC_FULL.md` §4.2 / spec.md §9 Open Question on RDN quoting.
#[derive(Clone, Eq)]
pub struct Dn {
    raw: String,
    normalized: String,
}

impl Dn {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize_dn(&raw);
        Dn { raw, normalized }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn normalized(&self) -> &str {
        &self.normalized
    }

    /// `self` is an ancestor of (or equal to) `other`.
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        if self.normalized == other.normalized {
            return true;
        }
        other
            .normalized
            .strip_suffix(self.normalized.as_str())
            .map(|prefix| prefix.ends_with(','))
            .unwrap_or(false)
    }

    pub fn is_equal(&self, other: &Dn) -> bool {
        self.normalized == other.normalized
    }

    /// The DN with its leading RDN stripped, or `None` if this is already a
    /// root (single-RDN) DN.
    pub fn parent(&self) -> Option<Dn> {
        split_first_rdn(&self.raw).1.map(Dn::new)
    }

    /// The first RDN's attribute value, with one level of quote/backslash
    /// handling, as used by the COS template "grade" extraction (spec.md
    /// §4.2, §9 Open Question — quoting beyond one level is not unescaped).
    pub fn first_rdn_value(&self) -> Option<String> {
        let (rdn, _) = split_first_rdn(&self.raw);
        let eq = rdn.find('=')?;
        let mut value = rdn[eq + 1..].trim().to_string();
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].replace("\\,", ",");
        }
        Some(value)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl std::hash::Hash for Dn {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.raw)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn normalize_dn(raw: &str) -> String {
    raw.split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits off the first RDN, honouring a single level of backslash-escaped
/// commas (e.g. `cn=Doe\, John,ou=People,o=ex`).
fn split_first_rdn(raw: &str) -> (&str, Option<&str>) {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b',' && (i == 0 || bytes[i - 1] != b'\\') {
            return (&raw[..i], Some(raw[i + 1..].trim_start()));
        }
        i += 1;
    }
    (raw, None)
}

/// A single attribute value. Kept as UTF-8 text: the real server's values are
/// arbitrary byte strings, but every type this subsystem computes over
/// (DNs, grades, specifiers, booleans-as-strings) is textual, so this crate
/// simplifies to `String` rather than carrying an unused binary path.
pub type Value = String;

/// An ordered, possibly-empty set of attribute values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet(pub Vec<Value>);

impl ValueSet {
    pub fn single(v: impl Into<Value>) -> Self {
        ValueSet(vec![v.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    pub fn contains_ci(&self, value: &str) -> bool {
        self.0.iter().any(|v| v.eq_ignore_ascii_case(value))
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        ValueSet(iter.into_iter().collect())
    }
}

/// An opaque, host-defined identifier for an entry, stable for the entry's
/// in-memory lifetime. Used to key the per-entry vattr cache side table
/// (`dispatcher::entry_cache`) since the real entry object lives in the host
/// and is only reached through this trait.
pub type EntryId = u64;

/// The directory entry interface the subsystem reads. A real host backs this
/// with its native entry representation; tests back it with `FakeEntry`.
pub trait Entry: Send + Sync {
    fn id(&self) -> EntryId;
    fn dn(&self) -> &Dn;
    fn object_classes(&self) -> Vec<String>;

    /// Stored (non-virtual) values for exactly this base type, not subtypes.
    fn get_attribute(&self, base_type: &str) -> Option<ValueSet>;

    /// Stored values for `base_type` and every subtype of it (`cn;lang-en`
    /// is a subtype of `cn`), as `(actual_type_name, values)` pairs.
    fn get_attribute_with_subtypes(&self, base_type: &str) -> Vec<(String, ValueSet)> {
        self.get_attribute(base_type)
            .map(|vs| vec![(base_type.to_string(), vs)])
            .unwrap_or_default()
    }

    /// Every stored attribute name present on the entry (for `list_types`).
    fn stored_attribute_names(&self) -> Vec<String>;

    fn has_object_class(&self, oc: &str) -> bool {
        self.object_classes().iter().any(|c| c.eq_ignore_ascii_case(oc))
    }
}

/// LDAP search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

/// The storage backend collaborator: naming contexts, search, and fetch.
pub trait Backend: Send + Sync {
    fn naming_contexts(&self) -> Vec<Dn>;
    fn search(&self, base: &Dn, scope: Scope, filter: &Filter) -> Vec<Arc<dyn Entry>>;
    fn get_entry(&self, dn: &Dn) -> Option<Arc<dyn Entry>>;
    /// True if `dn` names an entry held by a backend local to this server
    /// (as opposed to a referral / remote suffix).
    fn is_local(&self, dn: &Dn) -> bool {
        self.naming_contexts().iter().any(|nc| nc.is_ancestor_of(dn))
    }
}

/// Backend lifecycle states (spec.md §6 backend state-change hook).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Online,
    Offline,
    Delete,
}

#[derive(Debug, Clone)]
pub struct BackendStateChange {
    pub backend_name: String,
    pub suffix: Dn,
    pub old_state: BackendState,
    pub new_state: BackendState,
}

/// The schema registry collaborator.
pub trait SchemaSource: Send + Sync {
    fn schema_check_enabled(&self) -> bool;
    /// Object classes that permit `attr_type`, used by the dispatcher's
    /// schema check (spec.md §4.1) and the COS cache's schema enforcement
    /// (spec.md §4.2).
    fn object_classes_for_attribute(&self, attr_type: &str) -> Vec<String>;
}

/// Access-control evaluation is out of scope (spec.md §1); this is the single
/// hook point the dispatcher would invoke in a full host integration.
pub trait AccessControl: Send + Sync {
    fn access_allowed(&self, entry: &dyn Entry, attr_type: &str) -> bool;
}

/// An `AccessControl` that allows everything, for hosts/tests that don't
/// model ACLs.
pub struct AllowAll;
impl AccessControl for AllowAll {
    fn access_allowed(&self, _entry: &dyn Entry, _attr_type: &str) -> bool {
        true
    }
}

/// The kind of post-operation that produced a [`PostOpEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    Add,
    Modify,
    ModRdn,
    Delete,
}

/// Delivered by the host's post-operation hooks (spec.md §6). Only
/// successful operations are ever constructed.
#[derive(Debug, Clone)]
pub struct PostOpEvent {
    pub entry_pre: Option<Arc<dyn Entry>>,
    pub entry_post: Option<Arc<dyn Entry>>,
    pub target_dn: Dn,
    pub modtype: ModType,
}

/// Outcome of the search rewriter hook (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    KeepLooking,
    RewroteOk { base: Dn, scope: Scope, filter: Filter },
    Refuse,
    OperationsError,
}

/// Byte-exact recognised names from spec.md §6.
pub mod names {
    pub const COS_DEFINITION_OC: &[&str] = &[
        "cosDefinition",
        "cosClassicDefinition",
        "cosPointerDefinition",
        "cosIndirectDefinition",
        "cosSuperDefinition",
    ];
    pub const COS_TEMPLATE_OC: &str = "cosTemplate";
    pub const COS_TARGET_TREE: &str = "cosTargetTree";
    pub const COS_TEMPLATE_DN: &str = "cosTemplateDn";
    pub const COS_SPECIFIER: &str = "cosSpecifier";
    pub const COS_INDIRECT_SPECIFIER: &str = "cosIndirectSpecifier";
    pub const COS_ATTRIBUTE: &str = "cosAttribute";
    pub const COS_PRIORITY: &str = "cosPriority";

    pub const COS_QUALIFIER_OPERATIONAL: &str = " operational";
    pub const COS_QUALIFIER_MERGE: &str = " merge-schemes";
    pub const COS_QUALIFIER_OVERRIDE: &str = " override";
    pub const COS_QUALIFIER_DEFAULT: &str = " default";
    pub const COS_QUALIFIER_OPERATIONAL_DEFAULT: &str = " operational-default";

    pub const ROLE_DEFINITION_OC: &[&str] = &[
        "nsRoleDefinition",
        "nsSimpleRoleDefinition",
        "nsComplexRoleDefinition",
        "nsManagedRoleDefinition",
        "nsFilteredRoleDefinition",
        "nsNestedRoleDefinition",
    ];
    pub const ROLE_FILTER_ATTR: &str = "nsRoleFilter";
    pub const ROLE_DN_ATTR: &str = "nsRoleDN";
    pub const ROLE_SCOPE_DN_ATTR: &str = "nsRoleScopeDN";

    pub const NS_ROLE_ATTR: &str = "nsRole";

    pub const VIEW_OC: &str = "nsView";
    pub const VIEW_FILTER_ATTR: &str = "nsViewFilter";

    pub const FILTER_ROLE_DEFINITIONS: &str = "(&(objectclass=nsRoleDefinition)(objectclass=ldapsubentry))";
    pub const FILTER_COS_DEFINITIONS: &str =
        "(&(|(objectclass=cosSuperDefinition)(objectclass=cosDefinition))(objectclass=ldapsubentry))";
    pub const FILTER_COS_TEMPLATES: &str =
        "(&(objectclass=costemplate)(|(objectclass=costemplate)(objectclass=ldapsubentry)))";
    pub const FILTER_VIEW_DEFINITIONS: &str = "(objectclass=nsView)";
}

/// The Views plug-in API (GUID `000e5b1e-9958-41da-a573-db8064a3894e`).
pub trait ViewsApi: Send + Sync {
    fn entry_exists(&self, view_dn: &Dn, entry: &dyn Entry) -> bool;
    fn entry_dn_exists(&self, view_dn: &Dn, entry_dn: &Dn) -> bool;
}

/// `caller_data` variants for the vattr cache invalidator callback
/// registered through the StateChange API (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VattrInvalidation {
    GlobalInvalidate,
    EntryInvalidate(EntryId),
}

/// The StateChange plug-in API (GUID `0A340151-6FB3-11d3-80D2-006008A6EFF3`),
/// re-exposed here since `notify::NotifyBus` is this subsystem's concrete
/// implementation of it.
pub trait StateChangeApi: Send + Sync {
    fn register(
        &self,
        caller_id: &str,
        dn: Option<Dn>,
        filter: Option<Filter>,
        cb: Box<dyn Fn(&PostOpEvent) + Send + Sync>,
    );
    fn unregister_all(&self, caller_id: &str);
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// An in-memory `Entry` for tests and the bundled demo harness.
    #[derive(Debug, Clone)]
    pub struct FakeEntry {
        id: EntryId,
        dn: Dn,
        object_classes: Vec<String>,
        attrs: HashMap<String, ValueSet>,
    }

    impl FakeEntry {
        pub fn new(dn: &str) -> Self {
            FakeEntry {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                dn: Dn::new(dn),
                object_classes: Vec::new(),
                attrs: HashMap::new(),
            }
        }

        pub fn with_object_classes(mut self, ocs: &[&str]) -> Self {
            self.object_classes = ocs.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn with_attr(mut self, name: &str, values: &[&str]) -> Self {
            self.attrs.insert(
                name.to_ascii_lowercase(),
                ValueSet(values.iter().map(|v| v.to_string()).collect()),
            );
            self
        }
    }

    impl Entry for FakeEntry {
        fn id(&self) -> EntryId {
            self.id
        }

        fn dn(&self) -> &Dn {
            &self.dn
        }

        fn object_classes(&self) -> Vec<String> {
            self.object_classes.clone()
        }

        fn get_attribute(&self, base_type: &str) -> Option<ValueSet> {
            if base_type.eq_ignore_ascii_case("objectclass") {
                return if self.object_classes.is_empty() {
                    None
                } else {
                    Some(ValueSet(self.object_classes.clone()))
                };
            }
            self.attrs.get(&base_type.to_ascii_lowercase()).cloned()
        }

        fn stored_attribute_names(&self) -> Vec<String> {
            let mut names = self.attrs.keys().cloned().collect::<Vec<_>>();
            if !self.object_classes.is_empty() {
                names.push("objectclass".to_string());
            }
            names
        }
    }

    #[test]
    fn dn_ancestor_and_normalization() {
        let parent = Dn::new("ou=People,o=ex");
        let child = Dn::new("UID=Alice, OU=People, O=EX");
        assert!(parent.is_ancestor_of(&child));
        assert!(parent.is_ancestor_of(&parent));
        assert!(!child.is_ancestor_of(&parent));
    }

    #[test]
    fn dn_parent_and_first_rdn_value() {
        let dn = Dn::new("cn=mgr,cn=data,ou=People,o=ex");
        assert_eq!(dn.first_rdn_value().unwrap(), "mgr");
        assert_eq!(dn.parent().unwrap().as_str(), "cn=data,ou=People,o=ex");
    }

    #[test]
    fn dn_first_rdn_value_handles_one_level_of_quoting() {
        let dn = Dn::new("cn=\"Doe\\, John\",ou=People,o=ex");
        assert_eq!(dn.first_rdn_value().unwrap(), "Doe, John");
    }
}
