use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Decision returned by a hook, telling the host what to do next with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Action {
    /// Send the current response.
    Deliver = 1,
    /// Send a cached response even though it expired.
    DeliverStale = 2,
    /// Request handled, nothing left to do.
    Done = 3,
    /// Something went wrong; the host may retry according to its policy.
    Error = 4,
    /// Fetch the answer from a backend.
    Fetch = 5,
    /// Compute the cache key.
    Hash = 6,
    /// Remember that this query must bypass the cache.
    HitForPass = 7,
    /// Look the query up in the cache.
    Lookup = 8,
    /// Bypass the cache for this request.
    Pass = 9,
    /// Relay the exchange to a backend without looking at it.
    Pipe = 10,
    /// Start processing over.
    Restart = 11,
    /// Evict the cached entry.
    Purge = 12,
    /// The hook wrote the response itself.
    Synth = 13,
    /// Silently discard the request.
    Drop = 14,
    /// Terminal failure.
    Fail = 15,
    /// Treat the lookup as a cache miss.
    Miss = 16,
    /// Let the host apply its built-in policy.
    Default = 17,
}

impl Action {
    pub const ALL: [Action; 17] = [
        Action::Deliver,
        Action::DeliverStale,
        Action::Done,
        Action::Error,
        Action::Fetch,
        Action::Hash,
        Action::HitForPass,
        Action::Lookup,
        Action::Pass,
        Action::Pipe,
        Action::Restart,
        Action::Purge,
        Action::Synth,
        Action::Drop,
        Action::Fail,
        Action::Miss,
        Action::Default,
    ];

    /// Convert from a raw code. Returns `None` for anything outside the closed set.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    pub fn as_u32(self) -> u32 {
        self.into()
    }

    /// Whether the action ends the request's delivery path.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Action::Deliver
                | Action::DeliverStale
                | Action::Done
                | Action::Synth
                | Action::Drop
                | Action::Fail
                | Action::Error
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Deliver => "DELIVER",
            Action::DeliverStale => "DELIVER_STALE",
            Action::Done => "DONE",
            Action::Error => "ERROR",
            Action::Fetch => "FETCH",
            Action::Hash => "HASH",
            Action::HitForPass => "HIT_FOR_PASS",
            Action::Lookup => "LOOKUP",
            Action::Pass => "PASS",
            Action::Pipe => "PIPE",
            Action::Restart => "RESTART",
            Action::Purge => "PURGE",
            Action::Synth => "SYNTH",
            Action::Drop => "DROP",
            Action::Fail => "FAIL",
            Action::Miss => "MISS",
            Action::Default => "DEFAULT",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
