//! Virtual Attribute Subsystem: a directory server's dispatcher for
//! computed attributes, plus the three built-in providers that compute
//! them — Class of Service (COS), Roles, and Views — and the change-notify
//! bus that keeps their caches warm.
//!
//! The wire protocol, on-disk storage, schema registry, and access control
//! are the host's responsibility: this crate only sees them through the
//! [`host`] traits (`Entry`, `Backend`, `SchemaSource`, `AccessControl`,
//! `ViewsApi`, `StateChangeApi`). Construct a [`VasSubsystem`] to wire the
//! dispatcher and all three caches together against a given host.

pub mod config;
pub mod cos;
pub mod diag;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod host;
pub mod notify;
pub mod roles;
pub mod views;

use std::sync::Arc;

pub use config::VasConfig;
pub use error::{Result, VasError};

use cos::{CosCache, CosProvider};
use dispatcher::Dispatcher;
use host::{Backend, SchemaSource};
use notify::NotifyBus;
use roles::RolesCache;
use views::ViewsEngine;

/// Everything a host needs to stand up virtual attributes: the dispatcher,
/// the three built-in providers registered against it, and the
/// change-notify bus driving their background updaters.
///
/// Built once at startup via [`VasSubsystem::new`], then [`start`](Self::start)
/// is called after the host has finished its own initialization so the
/// first rebuilds don't race the backend coming up.
pub struct VasSubsystem {
    pub dispatcher: Arc<Dispatcher>,
    pub cos: Arc<CosCache>,
    pub roles: Arc<RolesCache>,
    pub views: Arc<ViewsEngine>,
    pub notify: Arc<NotifyBus>,
    cos_updater: parking_lot::Mutex<Option<Arc<cos::updater::BackgroundUpdater>>>,
}

impl VasSubsystem {
    pub fn new(backend: Arc<dyn Backend>, schema: Arc<dyn SchemaSource>, config: VasConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(schema.clone(), config.clone()));
        let cos = CosCache::new(dispatcher.clone(), backend.clone(), schema, config.clone());
        let roles = RolesCache::new(backend.clone(), dispatcher.clone(), config);
        let views = ViewsEngine::new(backend);
        let notify = Arc::new(NotifyBus::new());

        cos.set_views(views.clone());

        let handle = dispatcher.register_provider(Box::new(CosProvider(cos.clone())), Some("cos".into()));
        cos.register_with_dispatcher(&handle);

        let roles_handle = dispatcher.register_provider(Box::new(RolesProvider(roles.clone())), Some("roles".into()));
        dispatcher.register_attribute(&roles_handle, host::names::NS_ROLE_ATTR, None);

        VasSubsystem {
            dispatcher,
            cos,
            roles,
            views,
            notify,
            cos_updater: parking_lot::Mutex::new(None),
        }
    }

    /// Performs one synchronous build of every cache, then spawns the
    /// background updaters subscribed to the change-notify bus. Call once
    /// after the host's backend is ready to serve reads.
    pub fn start(&self) {
        self.views.rebuild();
        self.roles.rebuild_all();

        use cos::updater::Rebuildable;
        self.cos.rebuild();

        self.roles.start(self.notify.as_ref());

        let cos_updater = Arc::new(cos::updater::BackgroundUpdater::spawn(self.cos.clone(), "cos-updater"));
        cos_updater.subscribe(self.notify.as_ref(), "cos-cache");
        *self.cos_updater.lock() = Some(cos_updater);
    }
}

/// Thin registrar so `RolesCache`'s `Arc` can be handed to the dispatcher as
/// a boxed provider without losing the shared ownership `start` also needs,
/// mirroring [`cos::CosProvider`].
struct RolesProvider(Arc<RolesCache>);

impl dispatcher::VirtualAttributeProvider for RolesProvider {
    fn get(
        &self,
        ctx: &mut dispatcher::VattrContext,
        entry: &dyn host::Entry,
        type_name: &str,
        flags: dispatcher::VattrFlags,
    ) -> dispatcher::ProviderOutcome {
        self.0.get(ctx, entry, type_name, flags)
    }

    fn compare(
        &self,
        ctx: &mut dispatcher::VattrContext,
        entry: &dyn host::Entry,
        type_name: &str,
        candidate: &host::Value,
    ) -> dispatcher::ProviderCompareOutcome {
        self.0.compare(ctx, entry, type_name, candidate)
    }

    fn list_types(&self, entry: &dyn host::Entry, flags: dispatcher::VattrFlags) -> Vec<String> {
        self.0.list_types(entry, flags)
    }
}
