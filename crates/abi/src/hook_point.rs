use std::fmt::{Display, Formatter};

use crate::Action;

/// The four places in a request's lifecycle where the host calls into a hook module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// A query arrived, before any cache lookup.
    Receive,
    /// A response is about to be sent.
    Deliver,
    /// A cached answer was found.
    CacheHit,
    /// No cached answer exists.
    CacheMiss,
}

impl HookPoint {
    pub const ALL: [HookPoint; 4] = [
        HookPoint::Receive,
        HookPoint::Deliver,
        HookPoint::CacheHit,
        HookPoint::CacheMiss,
    ];

    /// Name of the exported entry point.
    pub fn symbol(self) -> &'static str {
        match self {
            HookPoint::Receive => "hook_recv",
            HookPoint::Deliver => "hook_deliver",
            HookPoint::CacheHit => "hook_hit",
            HookPoint::CacheMiss => "hook_miss",
        }
    }

    /// Actions the host accepts from this point. `DEFAULT` is always legal.
    ///
    /// `ERROR` is accepted everywhere since it is how a hook reports a local failure.
    pub fn legal_actions(self) -> &'static [Action] {
        match self {
            HookPoint::Receive => &[
                Action::Lookup,
                Action::Pass,
                Action::Pipe,
                Action::Synth,
                Action::Drop,
                Action::Fail,
                Action::Error,
                Action::Default,
            ],
            HookPoint::Deliver => &[
                Action::Deliver,
                Action::DeliverStale,
                Action::Done,
                Action::Synth,
                Action::Drop,
                Action::Error,
                Action::Default,
            ],
            HookPoint::CacheHit => &[
                Action::Pass,
                Action::HitForPass,
                Action::Restart,
                Action::DeliverStale,
                Action::Error,
                Action::Default,
            ],
            HookPoint::CacheMiss => &[
                Action::Fetch,
                Action::Miss,
                Action::Hash,
                Action::Purge,
                Action::Error,
                Action::Default,
            ],
        }
    }

    pub fn allows(self, action: Action) -> bool {
        self.legal_actions().contains(&action)
    }
}

impl Display for HookPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HookPoint::Receive => "on_receive",
            HookPoint::Deliver => "on_deliver",
            HookPoint::CacheHit => "on_cache_hit",
            HookPoint::CacheMiss => "on_cache_miss",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_error_always_legal() {
        for point in HookPoint::ALL {
            assert!(point.allows(Action::Default), "{point}");
            assert!(point.allows(Action::Error), "{point}");
        }
    }

    #[test]
    fn test_subsets() {
        assert!(HookPoint::Receive.allows(Action::Lookup));
        assert!(!HookPoint::Receive.allows(Action::Fetch));
        assert!(HookPoint::Deliver.allows(Action::DeliverStale));
        assert!(!HookPoint::Deliver.allows(Action::Lookup));
        assert!(HookPoint::CacheHit.allows(Action::HitForPass));
        assert!(!HookPoint::CacheHit.allows(Action::Deliver));
        assert!(HookPoint::CacheMiss.allows(Action::Purge));
        assert!(!HookPoint::CacheMiss.allows(Action::Pass));
    }

    #[test]
    fn test_symbols() {
        let symbols: Vec<_> = HookPoint::ALL.iter().map(|p| p.symbol()).collect();
        assert_eq!(symbols, ["hook_recv", "hook_deliver", "hook_hit", "hook_miss"]);
        assert_eq!(HookPoint::CacheMiss.to_string(), "on_cache_miss");
    }
}
