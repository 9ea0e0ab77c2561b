//! The change-notify bus (spec.md §4.4): a process-wide publish point that
//! delivers post-operation events to interested subscribers, used by the COS
//! and Roles caches to know when to rebuild without polling.
//!
//! Concretely, this is the subsystem's own implementation of
//! [`StateChangeApi`](crate::host::StateChangeApi) (plug-in GUID
//! `0A340151-6FB3-11d3-80D2-006008A6EFF3`).

use parking_lot::RwLock;
use thiserror::Error;

use crate::filter::Filter;
use crate::host::{Dn, ModType, PostOpEvent, StateChangeApi};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("caller id must not be empty")]
    EmptyCallerId,
}

pub type NotifyResult<T> = Result<T, NotifyError>;

struct Subscription {
    caller_id: String,
    dn: Option<Dn>,
    filter: Option<Filter>,
    callback: Box<dyn Fn(&PostOpEvent) + Send + Sync>,
}

/// Registers callbacks keyed by an optional DN scope and/or filter, and fans
/// out each [`PostOpEvent`] the host reports to every subscription whose
/// scope matches (spec.md §4.4 "Registration", "Dispatch").
#[derive(Default)]
pub struct NotifyBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl NotifyBus {
    pub fn new() -> Self {
        NotifyBus {
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Delivers `event` to every matching subscriber. A subscription with a
    /// `dn` matches only events whose target DN is that DN or a descendant
    /// of it; a subscription with a `filter` matches only events whose
    /// post-image entry satisfies it (spec.md §4.4 "Dispatch").
    pub fn notify(&self, event: &PostOpEvent) {
        for sub in self.subscriptions.read().iter() {
            if let Some(scope_dn) = &sub.dn {
                if !scope_dn.is_ancestor_of(&event.target_dn) {
                    continue;
                }
            }
            if let Some(filter) = &sub.filter {
                let matches = event
                    .entry_post
                    .as_ref()
                    .or(event.entry_pre.as_ref())
                    .map(|e| filter.matches(e.as_ref()))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            (sub.callback)(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl StateChangeApi for NotifyBus {
    fn register(
        &self,
        caller_id: &str,
        dn: Option<Dn>,
        filter: Option<Filter>,
        cb: Box<dyn Fn(&PostOpEvent) + Send + Sync>,
    ) {
        self.subscriptions.write().push(Subscription {
            caller_id: caller_id.to_string(),
            dn,
            filter,
            callback: cb,
        });
    }

    fn unregister_all(&self, caller_id: &str) {
        self.subscriptions.write().retain(|s| s.caller_id != caller_id);
    }
}

/// Convenience for callers that want to validate `caller_id` before
/// registering (spec.md §4.4 invariant: every subscription is attributable
/// to a caller id so `unregister_all` can find it again).
pub fn validated_caller_id(caller_id: &str) -> NotifyResult<&str> {
    if caller_id.is_empty() {
        Err(NotifyError::EmptyCallerId)
    } else {
        Ok(caller_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::FakeEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(target_dn: &str, modtype: ModType, post: Option<FakeEntry>) -> PostOpEvent {
        PostOpEvent {
            entry_pre: None,
            entry_post: post.map(|e| Arc::new(e) as Arc<dyn crate::host::Entry>),
            target_dn: Dn::new(target_dn),
            modtype,
        }
    }

    #[test]
    fn subscriber_scoped_to_dn_only_sees_descendant_events() {
        let bus = NotifyBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register(
            "cos",
            Some(Dn::new("ou=people,o=ex")),
            None,
            Box::new(move |_e| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.notify(&event("uid=alice,ou=people,o=ex", ModType::Add, None));
        bus.notify(&event("uid=bob,ou=groups,o=ex", ModType::Add, None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_with_filter_only_sees_matching_entries() {
        let bus = NotifyBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register(
            "roles",
            None,
            Some(Filter::parse("(objectclass=nsRoleDefinition)").unwrap()),
            Box::new(move |_e| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let matching = FakeEntry::new("cn=r1,o=ex").with_object_classes(&["nsRoleDefinition"]);
        let non_matching = FakeEntry::new("cn=u1,o=ex").with_object_classes(&["inetOrgPerson"]);
        bus.notify(&event("cn=r1,o=ex", ModType::Add, Some(matching)));
        bus.notify(&event("cn=u1,o=ex", ModType::Add, Some(non_matching)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_all_drops_every_subscription_for_that_caller() {
        let bus = NotifyBus::new();
        bus.register("cos", None, None, Box::new(|_e| {}));
        bus.register("cos", None, None, Box::new(|_e| {}));
        bus.register("roles", None, None, Box::new(|_e| {}));
        assert_eq!(bus.subscriber_count(), 3);
        bus.unregister_all("cos");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn empty_caller_id_is_rejected_by_the_validation_helper() {
        assert_eq!(validated_caller_id(""), Err(NotifyError::EmptyCallerId));
        assert_eq!(validated_caller_id("cos"), Ok("cos"));
    }
}
