use crate::{ErrorKind, HookError};

/// Layout version of the packet capability table.
pub const PACKET_ABI_VERSION: u64 = 0x2;

/// Layout version of the host environment (session) table.
pub const HOST_ENV_ABI_VERSION: u64 = 0x2;

/// The pair of table versions one side was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiVersions {
    pub packet: u64,
    pub host_env: u64,
}

impl AbiVersions {
    pub const CURRENT: AbiVersions = AbiVersions {
        packet: PACKET_ABI_VERSION,
        host_env: HOST_ENV_ABI_VERSION,
    };

    /// Check what the host offers against what we were built for.
    ///
    /// Both versions must match exactly; hooks must not be invoked otherwise.
    pub fn negotiate(self, offered: AbiVersions) -> Result<Negotiated, HookError> {
        if offered.packet != self.packet {
            return Err(HookError::new(
                ErrorKind::AbiMismatch,
                format!(
                    "packet table version mismatch: host offers {:#x}, module expects {:#x}",
                    offered.packet, self.packet
                ),
            ));
        }
        if offered.host_env != self.host_env {
            return Err(HookError::new(
                ErrorKind::AbiMismatch,
                format!(
                    "host environment table version mismatch: host offers {:#x}, module expects {:#x}",
                    offered.host_env, self.host_env
                ),
            ));
        }
        Ok(Negotiated { versions: offered })
    }
}

impl Default for AbiVersions {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Proof that negotiation succeeded. Only [`AbiVersions::negotiate`] creates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    versions: AbiVersions,
}

impl Negotiated {
    pub fn versions(&self) -> AbiVersions {
        self.versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_versions() {
        let token = AbiVersions::CURRENT.negotiate(AbiVersions::CURRENT).unwrap();
        assert_eq!(token.versions(), AbiVersions { packet: 2, host_env: 2 });
    }

    #[test]
    fn test_mismatch_rejected() {
        let offered = AbiVersions { packet: 3, host_env: 2 };
        let err = AbiVersions::CURRENT.negotiate(offered).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AbiMismatch);

        let offered = AbiVersions { packet: 2, host_env: 1 };
        assert!(AbiVersions::CURRENT.negotiate(offered).is_err());
    }
}
