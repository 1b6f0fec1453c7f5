//! Hook dispatch and the C boundary between hosts and hook modules.
//!
//! A hook is a [`Hook`] implementation. Inside the host it runs through a [`HookDispatcher`];
//! as a loadable module it is exported with [`export_hooks!`] and reached by the host through
//! [`ModuleEntries`], with the capability tables from [`host_tables`] on the other side.

mod dispatch;
mod export;
mod host;
mod remote;

use edgehook_abi::Action;
use edgehook_packet::PacketOps;
use edgehook_session::SessionOps;

pub use dispatch::{HookDispatcher, HookRunner, validate_action};
#[doc(hidden)]
pub use export::__private;
pub use export::{HookEntry, ModuleEntries, run_exported};
pub use host::{host_tables, last_error_description};
pub use remote::{RemotePacket, RemoteRecord, RemoteSession};

/// A hook module. Every point defaults to [`Action::Default`].
///
/// Hooks are called concurrently for independent requests and get the request's state by
/// borrow only; anything kept across calls must be synchronized by the implementation.
pub trait Hook: Send + Sync {
    fn on_receive(&self, _session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        Action::Default
    }

    fn on_deliver(&self, _session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        Action::Default
    }

    fn on_cache_hit(&self, _session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        Action::Default
    }

    fn on_cache_miss(&self, _session: &mut dyn SessionOps, _packet: &mut dyn PacketOps) -> Action {
        Action::Default
    }
}

impl<H: Hook + ?Sized> Hook for std::sync::Arc<H> {
    fn on_receive(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        (**self).on_receive(session, packet)
    }

    fn on_deliver(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        (**self).on_deliver(session, packet)
    }

    fn on_cache_hit(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        (**self).on_cache_hit(session, packet)
    }

    fn on_cache_miss(&self, session: &mut dyn SessionOps, packet: &mut dyn PacketOps) -> Action {
        (**self).on_cache_miss(session, packet)
    }
}
