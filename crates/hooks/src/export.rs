use std::panic::{self, AssertUnwindSafe};

use edgehook_abi::ffi::{EdgeDnsFnTable, FnTable, RawPacket, RawSession};
use edgehook_abi::{AbiVersions, Action, HookPoint, Result};
use edgehook_packet::ParsedPacket;
use edgehook_session::SessionState;
use tracing::{error, warn};

use crate::dispatch::{HookRunner, validate_action};
use crate::host::host_tables;
use crate::remote::{RemotePacket, RemoteSession};
use crate::Hook;

/// Signature of the `hook_recv`, `hook_deliver`, `hook_hit` and `hook_miss` symbols.
///
/// The return value is an action code. Hosts must validate it before acting on it.
pub type HookEntry = unsafe extern "C" fn(
    env: *const EdgeDnsFnTable,
    session: *mut RawSession,
    fns: *const FnTable,
    packet: *mut RawPacket,
) -> u32;

/// A module's four entry points, as resolved by the host.
#[derive(Clone, Copy)]
pub struct ModuleEntries {
    receive: HookEntry,
    deliver: HookEntry,
    cache_hit: HookEntry,
    cache_miss: HookEntry,
}

impl ModuleEntries {
    /// # Safety
    ///
    /// Every entry must follow the hook calling convention: use the handles only through the
    /// tables it is given, and only for the duration of the call.
    pub unsafe fn new(receive: HookEntry, deliver: HookEntry, cache_hit: HookEntry, cache_miss: HookEntry) -> Self {
        Self {
            receive,
            deliver,
            cache_hit,
            cache_miss,
        }
    }

    fn entry(&self, point: HookPoint) -> HookEntry {
        match point {
            HookPoint::Receive => self.receive,
            HookPoint::Deliver => self.deliver,
            HookPoint::CacheHit => self.cache_hit,
            HookPoint::CacheMiss => self.cache_miss,
        }
    }
}

impl HookRunner for ModuleEntries {
    fn run(&self, point: HookPoint, session: &mut SessionState, packet: &mut ParsedPacket) -> Result<Action> {
        let (env, fns) = host_tables();
        let session = session as *mut SessionState as *mut RawSession;
        let packet = packet as *mut ParsedPacket as *mut RawPacket;
        // SAFETY: both handles are exclusively borrowed for the duration of the call.
        let code = unsafe { (self.entry(point))(env, session, fns, packet) };
        validate_action(point, code)
    }
}

/// Body of an exported entry point. Use [`export_hooks!`](crate::export_hooks) rather than
/// calling this directly.
///
/// Null tables or handles, a table version mismatch and a panicking hook all yield
/// [`Action::Error`].
///
/// # Safety
///
/// Non-null pointers must be the tables and handles a host passed to the entry point.
pub unsafe fn run_exported<H: Hook + 'static>(
    hook: fn() -> &'static H,
    point: HookPoint,
    env: *const EdgeDnsFnTable,
    session: *mut RawSession,
    fns: *const FnTable,
    packet: *mut RawPacket,
) -> u32 {
    if env.is_null() || session.is_null() || fns.is_null() || packet.is_null() {
        warn!(%point, "hook called with a null table or handle");
        return Action::Error.as_u32();
    }
    // SAFETY: non-null, and valid per the caller's contract.
    let (env, fns) = unsafe { (&*env, &*fns) };
    let offered = AbiVersions {
        packet: fns.abi_version,
        host_env: env.abi_version,
    };
    if let Err(e) = AbiVersions::CURRENT.negotiate(offered) {
        warn!(%point, error = %e, "refusing to run hook");
        return Action::Error.as_u32();
    }

    let mut session = unsafe { RemoteSession::new(env, session) };
    let mut packet = unsafe { RemotePacket::new(fns, packet) };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let hook = hook();
        match point {
            HookPoint::Receive => hook.on_receive(&mut session, &mut packet),
            HookPoint::Deliver => hook.on_deliver(&mut session, &mut packet),
            HookPoint::CacheHit => hook.on_cache_hit(&mut session, &mut packet),
            HookPoint::CacheMiss => hook.on_cache_miss(&mut session, &mut packet),
        }
    }));
    match result {
        Ok(action) => action.as_u32(),
        Err(_) => {
            error!(%point, "hook panicked");
            Action::Error.as_u32()
        }
    }
}

#[doc(hidden)]
pub mod __private {
    pub use edgehook_abi::HookPoint;
    pub use edgehook_abi::ffi::{EdgeDnsFnTable, FnTable, RawPacket, RawSession};
}

/// Export a [`Hook`] as the four C entry points a host looks up.
///
/// The hook is built on first use, with `Default` or with the given expression.
///
/// ```ignore
/// edgehook_hooks::export_hooks!(MyHook);
/// edgehook_hooks::export_hooks!(MyHook, MyHook::from_env());
/// ```
#[macro_export]
macro_rules! export_hooks {
    (@entry $symbol:ident, $point:ident, $hook:ty) => {
        /// # Safety
        ///
        /// Must be called by a hook host with its own tables and live handles.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $symbol(
            env: *const $crate::__private::EdgeDnsFnTable,
            session: *mut $crate::__private::RawSession,
            fns: *const $crate::__private::FnTable,
            packet: *mut $crate::__private::RawPacket,
        ) -> u32 {
            unsafe {
                $crate::run_exported::<$hook>(
                    __edgehook_instance,
                    $crate::__private::HookPoint::$point,
                    env,
                    session,
                    fns,
                    packet,
                )
            }
        }
    };
    ($hook:ty) => {
        $crate::export_hooks!($hook, <$hook as ::core::default::Default>::default());
    };
    ($hook:ty, $init:expr) => {
        fn __edgehook_instance() -> &'static $hook {
            static INSTANCE: ::std::sync::OnceLock<$hook> = ::std::sync::OnceLock::new();
            INSTANCE.get_or_init(|| $init)
        }

        $crate::export_hooks!(@entry hook_recv, Receive, $hook);
        $crate::export_hooks!(@entry hook_deliver, Deliver, $hook);
        $crate::export_hooks!(@entry hook_hit, CacheHit, $hook);
        $crate::export_hooks!(@entry hook_miss, CacheMiss, $hook);
    };
}
