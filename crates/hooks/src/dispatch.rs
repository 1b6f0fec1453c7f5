use edgehook_abi::{Action, HookError, HookPoint, Negotiated, Result};
use edgehook_packet::{PacketOps, ParsedPacket};
use edgehook_session::{SessionOps, SessionState};
use tracing::{debug, warn};

use crate::Hook;

/// Something the host can run a hook point through.
pub trait HookRunner: Send + Sync {
    fn run(&self, point: HookPoint, session: &mut SessionState, packet: &mut ParsedPacket) -> Result<Action>;
}

/// Check a raw action code returned at `point`.
///
/// Codes outside the action set and actions the point does not accept are both rejected.
pub fn validate_action(point: HookPoint, code: u32) -> Result<Action> {
    let Some(action) = Action::from_u32(code) else {
        warn!(%point, code, "hook returned an unknown action code");
        return Err(HookError::protocol(format!("{} returned unknown action code {}", point, code)));
    };
    if !point.allows(action) {
        warn!(%point, %action, "hook returned an action that is not legal here");
        return Err(HookError::protocol(format!("{} may not return {}", point, action)));
    }
    Ok(action)
}

/// Runs an in-process hook. Creating one requires a successful ABI negotiation.
pub struct HookDispatcher<H> {
    hook: H,
    negotiated: Negotiated,
}

impl<H: Hook> HookDispatcher<H> {
    pub fn new(hook: H, negotiated: Negotiated) -> Self {
        Self { hook, negotiated }
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    pub fn dispatch(
        &self,
        point: HookPoint,
        session: &mut dyn SessionOps,
        packet: &mut dyn PacketOps,
    ) -> Result<Action> {
        let action = match point {
            HookPoint::Receive => self.hook.on_receive(session, packet),
            HookPoint::Deliver => self.hook.on_deliver(session, packet),
            HookPoint::CacheHit => self.hook.on_cache_hit(session, packet),
            HookPoint::CacheMiss => self.hook.on_cache_miss(session, packet),
        };
        let action = validate_action(point, action.as_u32())?;
        debug!(%point, %action, "hook decided");
        Ok(action)
    }
}

impl<H: Hook> HookRunner for HookDispatcher<H> {
    fn run(&self, point: HookPoint, session: &mut SessionState, packet: &mut ParsedPacket) -> Result<Action> {
        self.dispatch(point, session, packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgehook_abi::{AbiVersions, ErrorKind};
    use edgehook_dns::DnsMessageBuilder;

    struct Fixed(Action);

    impl Hook for Fixed {
        fn on_receive(&self, _: &mut dyn SessionOps, _: &mut dyn PacketOps) -> Action {
            self.0
        }

        fn on_cache_miss(&self, _: &mut dyn SessionOps, _: &mut dyn PacketOps) -> Action {
            self.0
        }
    }

    fn run(hook: Fixed, point: HookPoint) -> Result<Action> {
        let negotiated = AbiVersions::CURRENT.negotiate(AbiVersions::CURRENT).unwrap();
        let dispatcher = HookDispatcher::new(hook, negotiated);
        let mut session = SessionState::new();
        let mut packet = ParsedPacket::new(DnsMessageBuilder::new().build());
        dispatcher.run(point, &mut session, &mut packet)
    }

    #[test]
    fn test_legal_action_passes() {
        assert_eq!(run(Fixed(Action::Lookup), HookPoint::Receive).unwrap(), Action::Lookup);
        assert_eq!(run(Fixed(Action::Fetch), HookPoint::CacheMiss).unwrap(), Action::Fetch);
    }

    #[test]
    fn test_illegal_action_rejected() {
        let err = run(Fixed(Action::Fetch), HookPoint::Receive).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(run(Fixed(Action::Lookup), HookPoint::Deliver).unwrap(), Action::Default);
        assert_eq!(run(Fixed(Action::Lookup), HookPoint::CacheHit).unwrap(), Action::Default);
    }

    #[test]
    fn test_validate_unknown_code() {
        assert_eq!(validate_action(HookPoint::Deliver, 0).unwrap_err().kind(), ErrorKind::ProtocolViolation);
        assert_eq!(validate_action(HookPoint::Deliver, 99).unwrap_err().kind(), ErrorKind::ProtocolViolation);
        assert_eq!(validate_action(HookPoint::Deliver, 1).unwrap(), Action::Deliver);
    }
}
