//! In-process demo/load driver for the virtual attribute subsystem.
//!
//! Wires a `VasSubsystem` to an in-memory backend carrying a classic COS
//! definition, a nested role, and a view, then exercises the dispatcher the
//! way a real LDAP front end would after a bind: resolve a virtual
//! attribute, list a subject's roles, rewrite a search under a view, and
//! push a post-op event through the notify bus to show the caches picking
//! it up on the next lookup.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use vas::dispatcher::VattrFlags;
use vas::filter::Filter;
use vas::host::test_support::FakeEntry;
use vas::host::{Backend, Dn, Entry, ModType, PostOpEvent, Scope, SchemaSource};
use vas::{VasConfig, VasSubsystem};

struct MemoryBackend {
    suffixes: Vec<Dn>,
    entries: Mutex<Vec<Arc<dyn Entry>>>,
}

impl MemoryBackend {
    fn new(suffixes: Vec<Dn>, entries: Vec<Arc<dyn Entry>>) -> Arc<Self> {
        Arc::new(MemoryBackend {
            suffixes,
            entries: Mutex::new(entries),
        })
    }

    fn add(&self, entry: Arc<dyn Entry>) {
        self.entries.lock().unwrap().push(entry);
    }
}

impl Backend for MemoryBackend {
    fn naming_contexts(&self) -> Vec<Dn> {
        self.suffixes.clone()
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

struct NoSchema;
impl SchemaSource for NoSchema {
    fn schema_check_enabled(&self) -> bool {
        false
    }
    fn object_classes_for_attribute(&self, _attr_type: &str) -> Vec<String> {
        Vec::new()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("vas-bench: Virtual Attribute Subsystem demo\n");

    let backend = seed_backend();
    let subsystem = VasSubsystem::new(backend.clone(), Arc::new(NoSchema), VasConfig::default());
    subsystem.start();

    demo_cos_resolution(&subsystem);
    demo_role_membership(&subsystem);
    demo_view_rewrite(&subsystem);
    demo_notify_driven_refresh(&subsystem, backend);

    println!("\ndone.");
}

fn seed_backend() -> Arc<MemoryBackend> {
    let cos_def = FakeEntry::new("cn=mailHostCos,o=ex")
        .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
        .with_attr("cosTargetTree", &["ou=people,o=ex"])
        .with_attr("cosTemplateDn", &["cn=mailHostTemplate,o=ex"])
        .with_attr("cosAttribute", &["mailHost"]);
    let tmpl = FakeEntry::new("cn=default,cn=mailHostTemplate,o=ex")
        .with_object_classes(&["costemplate"])
        .with_attr("mailHost", &["mail.example.com"]);

    let eng_role = FakeEntry::new("cn=eng,o=ex").with_object_classes(&["nsRoleDefinition", "nsManagedRoleDefinition", "ldapsubentry"]);
    let alice = FakeEntry::new("uid=alice,ou=people,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);

    let eng_view = FakeEntry::new("cn=engView,o=ex")
        .with_object_classes(&["nsView"])
        .with_attr("nsViewFilter", &["(department=engineering)"]);

    MemoryBackend::new(
        vec![Dn::new("o=ex")],
        vec![
            Arc::new(cos_def),
            Arc::new(tmpl),
            Arc::new(eng_role),
            Arc::new(alice),
            Arc::new(eng_view),
        ],
    )
}

fn demo_cos_resolution(subsystem: &VasSubsystem) {
    println!("=== COS: resolving mailHost for uid=alice ===");
    let alice = FakeEntry::new("uid=alice,ou=people,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);
    let outcome = subsystem
        .dispatcher
        .values_get(None, &alice, None, "mailHost", VattrFlags::default())
        .expect("cos should resolve mailHost from the default template");
    println!("mailHost = {:?}\n", outcome.value_sets[0].0);
}

fn demo_role_membership(subsystem: &VasSubsystem) {
    println!("=== Roles: nsRole for uid=alice ===");
    let alice = FakeEntry::new("uid=alice,ou=people,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);
    let outcome = subsystem
        .dispatcher
        .values_get(None, &alice, None, "nsRole", VattrFlags::default())
        .expect("alice should claim the eng role");
    println!("nsRole = {:?}\n", outcome.value_sets[0].0);
}

fn demo_view_rewrite(subsystem: &VasSubsystem) {
    println!("=== Views: rewriting a search under cn=engView,o=ex ===");
    let filter = Filter::parse("(uid=*)").unwrap();
    let outcome = subsystem.views.rewrite(&Dn::new("cn=engView,o=ex"), Scope::Subtree, &filter);
    println!("{outcome:?}\n");
}

fn demo_notify_driven_refresh(subsystem: &VasSubsystem, backend: Arc<MemoryBackend>) {
    println!("=== Notify bus: adding a role and timing the cache catching up ===");
    let new_member = FakeEntry::new("uid=bob,ou=people,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);
    backend.add(Arc::new(new_member.clone()));

    let started = Instant::now();
    subsystem.notify.notify(&PostOpEvent {
        entry_pre: None,
        entry_post: Some(Arc::new(new_member.clone())),
        target_dn: new_member.dn().clone(),
        modtype: ModType::Add,
    });

    // The background updater rebuilds asynchronously; a real front end would
    // rely on read-through staleness bounds rather than busy-polling like this.
    for _ in 0..10_000 {
        let outcome = subsystem
            .dispatcher
            .values_get(None, &new_member, None, "nsRole", VattrFlags::default());
        if matches!(&outcome, Ok(o) if o.value_sets[0].0.iter().any(|v| v == "cn=eng,o=ex")) {
            println!("uid=bob picked up cn=eng,o=ex after {:?}\n", started.elapsed());
            return;
        }
        std::thread::yield_now();
    }
    println!("uid=bob did not pick up the new role within the polling budget\n");
}
