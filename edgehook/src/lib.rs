//! Reference hook module and a small replay host for it.
//!
//! Built as a `cdylib`, the crate exports `hook_recv`, `hook_deliver`, `hook_hit` and
//! `hook_miss` for [`RewriteHook`], configured from the file named by `EDGEHOOK_CONFIG`.

pub mod config;
pub mod matcher;
pub mod replay;
pub mod rewrite;

pub use rewrite::{RewriteHook, RewriteRules};

edgehook_hooks::export_hooks!(RewriteHook, RewriteHook::from_env());
