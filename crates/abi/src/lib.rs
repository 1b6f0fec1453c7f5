//! Types shared by hook hosts and hook modules: the action set, hook points, table versions,
//! the error taxonomy, and the C layout of the capability tables.

mod action;
mod error;
pub mod ffi;
mod hook_point;
mod version;

pub use action::Action;
pub use error::{ErrorKind, HookError, Result};
pub use hook_point::HookPoint;
pub use version::{AbiVersions, HOST_ENV_ABI_VERSION, Negotiated, PACKET_ABI_VERSION};

pub use edgehook_dns::{DNS_MAX_HOSTNAME_LEN, DNS_MAX_PACKET_SIZE};
