mod common;

use std::sync::Arc;

use common::MemoryBackend;
use vas::cos::updater::Rebuildable;
use vas::filter::Filter;
use vas::host::test_support::FakeEntry;
use vas::host::{Dn, RewriteOutcome, Scope, ViewsApi};
use vas::views::ViewsEngine;

#[test]
fn subtree_search_below_a_view_is_rewritten_to_the_real_suffix() {
    let view = FakeEntry::new("cn=activeEmployees,o=ex")
        .with_object_classes(&["nsView"])
        .with_attr("nsViewFilter", &["(employeeStatus=active)"]);
    let backend = MemoryBackend::new(vec![Dn::new("o=ex")], vec![Arc::new(view)]);
    let engine = ViewsEngine::new(backend);
    engine.rebuild();

    let outcome = engine.rewrite(
        &Dn::new("uid=alice,cn=activeEmployees,o=ex"),
        Scope::Subtree,
        &Filter::parse("(cn=alice)").unwrap(),
    );
    match outcome {
        RewriteOutcome::RewroteOk { base, scope, filter } => {
            assert_eq!(base.as_str(), "o=ex");
            assert_eq!(scope, Scope::Subtree);
            assert!(filter.references_attr("employeestatus"));
        }
        other => panic!("expected RewroteOk, got {other:?}"),
    }
}

#[test]
fn views_api_membership_check_follows_the_composed_filter() {
    let view = FakeEntry::new("cn=activeEmployees,o=ex")
        .with_object_classes(&["nsView"])
        .with_attr("nsViewFilter", &["(employeeStatus=active)"]);
    let alice = FakeEntry::new("uid=alice,o=ex").with_attr("employeeStatus", &["active"]);
    let bob = FakeEntry::new("uid=bob,o=ex").with_attr("employeeStatus", &["inactive"]);

    let backend = MemoryBackend::new(
        vec![Dn::new("o=ex")],
        vec![Arc::new(view), Arc::new(alice), Arc::new(bob)],
    );
    let engine = ViewsEngine::new(backend);
    engine.rebuild();

    let view_dn = Dn::new("cn=activeEmployees,o=ex");
    assert!(engine.entry_dn_exists(&view_dn, &Dn::new("uid=alice,o=ex")));
    assert!(!engine.entry_dn_exists(&view_dn, &Dn::new("uid=bob,o=ex")));
}
