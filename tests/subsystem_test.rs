mod common;

use std::sync::Arc;

use common::{MemoryBackend, NoSchema};
use vas::dispatcher::VattrFlags;
use vas::host::test_support::FakeEntry;
use vas::host::Dn;
use vas::{VasConfig, VasSubsystem};

#[test]
fn subsystem_wires_cos_and_roles_into_one_dispatcher() {
    let cos_def = FakeEntry::new("cn=mailHostCos,o=ex")
        .with_object_classes(&["cosSuperDefinition", "cosDefinition", "cosPointerDefinition", "ldapsubentry"])
        .with_attr("cosTargetTree", &["o=ex"])
        .with_attr("cosTemplateDn", &["cn=mailHostTemplate,o=ex"])
        .with_attr("cosAttribute", &["mailHost"]);
    let tmpl = FakeEntry::new("cn=default,cn=mailHostTemplate,o=ex")
        .with_object_classes(&["costemplate"])
        .with_attr("mailHost", &["mail.example.com"]);
    let role = FakeEntry::new("cn=eng,o=ex").with_object_classes(&["nsRoleDefinition", "nsManagedRoleDefinition", "ldapsubentry"]);
    let subject = FakeEntry::new("uid=alice,o=ex").with_attr("nsRoleDN", &["cn=eng,o=ex"]);

    let backend = MemoryBackend::new(
        vec![Dn::new("o=ex")],
        vec![Arc::new(cos_def), Arc::new(tmpl), Arc::new(role), Arc::new(subject.clone())],
    );
    let subsystem = VasSubsystem::new(backend, Arc::new(NoSchema), VasConfig::default());
    subsystem.start();

    let mail = subsystem
        .dispatcher
        .values_get(None, &subject, None, "mailHost", VattrFlags::default())
        .expect("cos should resolve mailHost");
    assert_eq!(mail.value_sets[0].0, vec!["mail.example.com"]);

    let roles = subsystem
        .dispatcher
        .values_get(None, &subject, None, "nsRole", VattrFlags::default())
        .expect("roles should resolve nsRole");
    assert!(roles.value_sets[0].0.iter().any(|v| v == "cn=eng,o=ex"));
}
